//! Configuration structures for training, evaluation and serving.

use crate::types::ImageDimensions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for model training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training hyperparameters
    pub training: TrainingParams,
    /// Output locations
    pub output: OutputConfig,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            model: ModelConfig::default(),
            training: TrainingParams::default(),
            output: OutputConfig::default(),
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.data.validation_fraction) {
            return Err(Error::Config(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.data.validation_fraction
            )));
        }
        if self.training.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        let plateau = &self.training.lr_plateau;
        if self.training.early_stopping_min_delta < 0.0 || plateau.min_delta < 0.0 {
            return Err(Error::Config("min_delta must be non-negative".to_string()));
        }
        if self.data.prefetch_batches == 0 {
            return Err(Error::Config("prefetch_batches must be positive".to_string()));
        }
        self.data.image_size.validate_model_input()?;
        self.data.augmentation_params.validate()?;
        Ok(())
    }
}

/// Dataset locations and pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory containing `{image_id}.jpg` files
    pub images_dir: PathBuf,
    /// Training split manifest (`class -> [image_id]`)
    pub train_manifest: PathBuf,
    /// Test split manifest
    pub test_manifest: PathBuf,
    /// Nutrition catalog (`class -> nutrition values`)
    pub catalog_path: PathBuf,
    /// Model input resolution
    pub image_size: ImageDimensions,
    /// Whether to augment the training stream
    pub augmentation: bool,
    /// Augmentation parameters
    pub augmentation_params: AugmentationConfig,
    /// Fraction of the training manifest held out for validation
    pub validation_fraction: f64,
    /// Shuffle buffer size for the training stream
    pub shuffle_buffer: usize,
    /// Number of decoded batches buffered ahead of the consumer
    pub prefetch_batches: usize,
    /// Cap on samples per split, for smoke runs
    pub max_samples: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("data/food-101/images"),
            train_manifest: PathBuf::from("data/food-101/meta/train.json"),
            test_manifest: PathBuf::from("data/food-101/meta/test.json"),
            catalog_path: PathBuf::from("data/nutrition_database.json"),
            image_size: ImageDimensions::default(),
            augmentation: true,
            augmentation_params: AugmentationConfig::default(),
            validation_fraction: 0.1,
            shuffle_buffer: 10_000,
            prefetch_batches: 4,
            max_samples: None,
        }
    }
}

/// Data augmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Horizontal flip probability
    pub horizontal_flip_prob: f32,
    /// Largest additive brightness change on normalized intensities
    pub max_brightness_delta: f32,
    /// Contrast factor range
    pub contrast_range: (f32, f32),
    /// Saturation factor range
    pub saturation_range: (f32, f32),
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            max_brightness_delta: 0.2,
            contrast_range: (0.8, 1.2),
            saturation_range: (0.8, 1.2),
        }
    }
}

impl AugmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(Error::Config(format!(
                "horizontal_flip_prob must be in [0, 1], got {}",
                self.horizontal_flip_prob
            )));
        }
        if self.max_brightness_delta < 0.0 {
            return Err(Error::Config(
                "max_brightness_delta must be non-negative".to_string(),
            ));
        }
        for (name, (lo, hi)) in [
            ("contrast_range", self.contrast_range),
            ("saturation_range", self.saturation_range),
        ] {
            if lo > hi || lo < 0.0 {
                return Err(Error::Config(format!("invalid {name}: ({lo}, {hi})")));
            }
        }
        Ok(())
    }
}

/// Dual-head network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Filters of the first convolution block, doubled per block
    pub base_filters: usize,
    /// Width of the first dense layer of each head
    pub head_units: usize,
    /// Dropout after the first dense layer
    pub dropout: f64,
    /// Dropout after the second dense layer
    pub late_dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_filters: 32,
            head_units: 512,
            dropout: 0.3,
            late_dropout: 0.2,
        }
    }
}

/// Relative weight of the two loss terms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LossWeights {
    pub classification: f32,
    pub regression: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            classification: 1.0,
            regression: 0.5,
        }
    }
}

/// Reduce-on-plateau learning rate settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    /// Multiplier applied on plateau
    pub factor: f64,
    /// Epochs without improvement before reducing
    pub patience: usize,
    /// Floor learning rate
    pub min_lr: f64,
    /// Smallest loss decrease that counts as an improvement
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            patience: 3,
            min_lr: 1e-7,
            min_delta: 1e-4,
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of training epochs
    pub num_epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Loss weighting
    pub loss_weights: LossWeights,
    /// Early stopping patience on validation loss (epochs)
    pub early_stopping_patience: usize,
    /// Smallest validation-loss decrease that resets early stopping
    pub early_stopping_min_delta: f64,
    /// Learning rate plateau schedule
    pub lr_plateau: PlateauConfig,
    /// K for top-K accuracy
    pub top_k: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_epochs: 30,
            batch_size: 32,
            learning_rate: 0.001,
            loss_weights: LossWeights::default(),
            early_stopping_patience: 5,
            early_stopping_min_delta: 0.0,
            lr_plateau: PlateauConfig::default(),
            top_k: 5,
        }
    }
}

/// Where a training run writes its artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output/models"),
        }
    }
}

impl OutputConfig {
    pub fn best_model_dir(&self) -> PathBuf {
        self.output_dir.join("best_model")
    }

    pub fn final_model_dir(&self) -> PathBuf {
        self.output_dir.join("final_model")
    }

    pub fn training_log(&self) -> PathBuf {
        self.output_dir.join("training_log.csv")
    }
}

/// Inference service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Model artifact directory
    pub model_dir: PathBuf,
    /// Nutrition catalog path
    pub catalog_path: PathBuf,
    /// Input resolution expected from the model
    pub image_size: ImageDimensions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/best_model"),
            catalog_path: PathBuf::from("data/nutrition_database.json"),
            image_size: ImageDimensions::default(),
        }
    }
}

impl ServiceConfig {
    pub const MODEL_DIR_ENV: &'static str = "NUTRITION_MODEL_DIR";
    pub const CATALOG_ENV: &'static str = "NUTRITION_CATALOG";

    pub fn validate(&self) -> Result<()> {
        self.image_size.validate_model_input()
    }

    /// Applies `NUTRITION_MODEL_DIR` and `NUTRITION_CATALOG` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(Self::MODEL_DIR_ENV) {
            self.model_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var(Self::CATALOG_ENV) {
            self.catalog_path = PathBuf::from(path);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_training_config() {
        let config = TrainingConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.num_epochs, 30);
        assert_eq!(config.training.loss_weights.regression, 0.5);
        assert_eq!(config.data.validation_fraction, 0.1);
        assert_eq!(config.data.shuffle_buffer, 10_000);
        assert_eq!(config.training.lr_plateau.min_delta, 1e-4);
        assert_eq!(config.training.early_stopping_min_delta, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: TrainingConfig = toml::from_str(
            r#"
            seed = 7

            [training]
            num_epochs = 2
            batch_size = 4

            [data]
            images_dir = "fixtures/images"
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.training.num_epochs, 2);
        assert_eq!(config.training.learning_rate, 0.001);
        assert_eq!(config.data.images_dir, PathBuf::from("fixtures/images"));
        assert_eq!(config.data.image_size.width, 224);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrainingConfig::default();
        config.data.validation_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.data.augmentation_params.contrast_range = (1.2, 0.8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_square_images() {
        let mut config = TrainingConfig::default();
        config.data.image_size = ImageDimensions::new(224, 160, 3);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.data.image_size = ImageDimensions::new(0, 0, 3);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let service = ServiceConfig {
            image_size: ImageDimensions::new(160, 224, 3),
            ..ServiceConfig::default()
        };
        assert!(service.validate().is_err());
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_augmentation_config() {
        let config = AugmentationConfig::default();
        assert_eq!(config.horizontal_flip_prob, 0.5);
        assert_eq!(config.max_brightness_delta, 0.2);
        assert_eq!(config.saturation_range, (0.8, 1.2));
    }

    #[test]
    fn test_output_paths() {
        let output = OutputConfig {
            output_dir: PathBuf::from("runs/a"),
        };
        assert_eq!(output.best_model_dir(), PathBuf::from("runs/a/best_model"));
        assert_eq!(output.training_log(), PathBuf::from("runs/a/training_log.csv"));
    }
}
