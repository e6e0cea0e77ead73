//! Fixtures shared by the unit tests of this crate.

use std::path::Path;
use std::sync::Arc;

use burn::backend::NdArray;
use image::{DynamicImage, ImageBuffer, Rgb};
use nutrition_core::NutritionCatalog;
use nutrition_training::{save_artifact, ArtifactMetadata, NutritionNet, NutritionNetConfig};

pub type TestBackend = NdArray;

pub fn catalog() -> Arc<NutritionCatalog> {
    Arc::new(
        NutritionCatalog::from_json_str(
            r#"{
                "pizza": {"calories": 266, "protein": 11.0, "fat": 10.0, "carbs": 33.0, "fiber": 2.3, "sugars": 3.6, "sodium": 598},
                "sushi": {"calories": 130, "protein": 5.8, "fat": 0.6, "carbs": 28.0, "fiber": 0.4, "sugars": 3.5, "sodium": 428}
            }"#,
        )
        .unwrap(),
    )
}

/// Saves an untrained two-class model for `input_size` images.
pub fn save_tiny_model(dir: &Path, input_size: usize) {
    let config = NutritionNetConfig::new(2)
        .with_input_size(input_size)
        .with_base_filters(2)
        .with_head_units(8);
    let model: NutritionNet<TestBackend> = config.init(&Default::default());
    let metadata = ArtifactMetadata::new(&config, catalog().class_names().to_vec());
    save_artifact(&model, &metadata, dir).unwrap();
}

pub fn solid_image(size: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(size, size, Rgb([value, value, value])))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}
