//! Fixtures shared by the unit tests of this crate.

use std::path::Path;
use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};
use image::{ImageBuffer, Rgb};
use nutrition_core::NutritionCatalog;
use nutrition_dataset::SplitManifest;

use crate::model::NutritionNetConfig;

pub type TestBackend = NdArray;
pub type TestAutodiffBackend = Autodiff<NdArray>;

pub const CATALOG: &str = r#"{
    "pizza": {"calories": 266, "protein": 11.0, "fat": 10.0, "carbs": 33.0, "fiber": 2.3, "sugars": 3.6, "sodium": 598},
    "sushi": {"calories": 130, "protein": 5.8, "fat": 0.6, "carbs": 28.0, "fiber": 0.4, "sugars": 3.5, "sodium": 428}
}"#;

/// Small network that still goes through all four pooling blocks.
pub fn tiny_config(num_classes: usize, input_size: usize) -> NutritionNetConfig {
    NutritionNetConfig::new(num_classes)
        .with_input_size(input_size)
        .with_base_filters(2)
        .with_head_units(8)
}

pub fn catalog() -> Arc<NutritionCatalog> {
    Arc::new(NutritionCatalog::from_json_str(CATALOG).unwrap())
}

/// Writes `per_class` jpg images for pizza (bright) and sushi (dark) into
/// `dir` and returns the matching manifest.
pub fn write_images(dir: &Path, per_class: usize, size: u32) -> SplitManifest {
    let mut manifest = SplitManifest::default();
    for (class, shade) in [("pizza", 220u8), ("sushi", 30u8)] {
        let mut ids = Vec::new();
        for i in 0..per_class {
            let id = format!("{class}_{i}");
            ImageBuffer::from_fn(size, size, |x, _| Rgb([shade, (x * 4) as u8, shade / 2]))
                .save(dir.join(format!("{id}.jpg")))
                .unwrap();
            ids.push(id);
        }
        manifest.insert(class, ids);
    }
    manifest
}
