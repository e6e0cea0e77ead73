//! Sample pipeline: `(path, label)` to model-ready samples.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use nutrition_core::{
    AugmentationConfig, ImageDimensions, NutritionCatalog, Result, NUTRITION_DIMS,
};
use rand::Rng;

use crate::augmentation::Augmenter;
use crate::preprocess::{ImageInput, ImagePreprocessor};

/// One decoded, normalized and labelled image.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// HWC values in `[0, 1]`
    pub image: Vec<f32>,
    pub class_index: usize,
    pub nutrition: [f32; NUTRITION_DIMS],
}

/// Image prepared for a single prediction, with the decoded original kept
/// for display.
#[derive(Debug, Clone)]
pub struct InferenceInput {
    pub image: Vec<f32>,
    pub original: DynamicImage,
}

/// Where a pipeline is used. Only `Training` augments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Training,
    Evaluation,
    Inference,
}

/// One-hot vector of length `num_classes`.
pub fn one_hot(index: usize, num_classes: usize) -> Vec<f32> {
    let mut encoded = vec![0.0; num_classes];
    if let Some(slot) = encoded.get_mut(index) {
        *slot = 1.0;
    }
    encoded
}

/// Index of the largest value, first one on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Reusable transform shared by training, evaluation and inference.
#[derive(Debug, Clone)]
pub struct SamplePipeline {
    catalog: Arc<NutritionCatalog>,
    preprocessor: ImagePreprocessor,
    augmenter: Option<Augmenter>,
    mode: PipelineMode,
}

impl SamplePipeline {
    /// Pipeline without augmentation.
    pub fn new(catalog: Arc<NutritionCatalog>, dims: ImageDimensions, mode: PipelineMode) -> Self {
        Self {
            catalog,
            preprocessor: ImagePreprocessor::new(dims),
            augmenter: None,
            mode,
        }
    }

    /// Training pipeline; `augmentation` of `None` trains on clean images.
    pub fn training(
        catalog: Arc<NutritionCatalog>,
        dims: ImageDimensions,
        augmentation: Option<AugmentationConfig>,
    ) -> Self {
        Self {
            augmenter: augmentation.map(Augmenter::new),
            ..Self::new(catalog, dims, PipelineMode::Training)
        }
    }

    /// Same catalog and resolution, without augmentation.
    pub fn evaluation(&self) -> Self {
        Self::new(
            Arc::clone(&self.catalog),
            self.preprocessor.dims(),
            PipelineMode::Evaluation,
        )
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn catalog(&self) -> &Arc<NutritionCatalog> {
        &self.catalog
    }

    pub fn dims(&self) -> ImageDimensions {
        self.preprocessor.dims()
    }

    /// Width of the produced images; the model side is square.
    pub fn image_size(&self) -> usize {
        self.preprocessor.dims().width as usize
    }

    /// Produced image shape as `[height, width, channels]`
    pub fn input_shape(&self) -> [usize; 3] {
        self.preprocessor.dims().hwc()
    }

    pub fn num_classes(&self) -> usize {
        self.catalog.len()
    }

    /// Builds a sample from an already decoded image.
    pub fn sample_from_image<R: Rng>(
        &self,
        image: &DynamicImage,
        label: &str,
        rng: &mut R,
    ) -> Result<Sample> {
        let (class_index, nutrition) = self.catalog.lookup(label)?;
        let mut pixels = self.preprocessor.preprocess(image);

        if self.mode == PipelineMode::Training {
            if let Some(augmenter) = &self.augmenter {
                let dims = self.preprocessor.dims();
                augmenter.apply(&mut pixels, dims.width as usize, dims.height as usize, rng);
            }
        }

        Ok(Sample {
            image: pixels,
            class_index,
            nutrition: nutrition.to_array(),
        })
    }

    /// Loads one `(path, label)` pair. The label is checked against the
    /// catalog before the file is read.
    pub fn load_sample<R: Rng>(&self, path: &Path, label: &str, rng: &mut R) -> Result<Sample> {
        self.catalog.lookup(label)?;
        let image = self.preprocessor.open(path)?;
        self.sample_from_image(&image, label, rng)
    }

    /// Prepares one inbound image; never augments.
    pub fn prepare_inference(&self, input: ImageInput) -> Result<InferenceInput> {
        let original = input.decode()?;
        let image = self.preprocessor.preprocess(&original);
        Ok(InferenceInput { image, original })
    }
}
