//! Model artifact: Burn record plus a JSON metadata sidecar.
//!
//! Layout of an artifact directory:
//! - `model.mpk`: weights written by `CompactRecorder`
//! - `metadata.json`: input shape, named output shapes, class list and
//!   network hyperparameters

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use chrono::{DateTime, Utc};
use nutrition_core::{Error, Result, NUTRITION_DIMS};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{NutritionNet, NutritionNetConfig, CLASSIFICATION_OUTPUT, NUTRITION_OUTPUT};

pub const MODEL_STEM: &str = "model";
pub const MODEL_FILE: &str = "model.mpk";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub outputs: Vec<OutputSpec>,
    pub class_names: Vec<String>,
    pub model: NutritionNetConfig,
    pub created_at: DateTime<Utc>,
    /// Epoch the weights come from, when saved during training
    #[serde(default)]
    pub epoch: Option<usize>,
}

impl ArtifactMetadata {
    pub fn new(model: &NutritionNetConfig, class_names: Vec<String>) -> Self {
        Self {
            input_shape: model.input_shape(),
            outputs: vec![
                OutputSpec {
                    name: CLASSIFICATION_OUTPUT.to_string(),
                    shape: vec![model.num_classes],
                },
                OutputSpec {
                    name: NUTRITION_OUTPUT.to_string(),
                    shape: vec![model.nutrition_dims],
                },
            ],
            class_names,
            model: model.clone(),
            created_at: Utc::now(),
            epoch: None,
        }
    }

    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn output_shape(&self, name: &str) -> Option<&[usize]> {
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.shape.as_slice())
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Checks the two-output contract and its agreement with the class list
    /// and hyperparameters.
    pub fn validate(&self) -> Result<()> {
        let expected_input = self.model.input_shape();
        if self.input_shape != expected_input {
            return Err(Error::ShapeMismatch {
                what: "model input".to_string(),
                expected: expected_input.to_vec(),
                actual: self.input_shape.to_vec(),
            });
        }

        let k = self.class_names.len();
        check_output(self, CLASSIFICATION_OUTPUT, &[k])?;
        check_output(self, NUTRITION_OUTPUT, &[NUTRITION_DIMS])?;

        if self.model.num_classes != k || self.model.nutrition_dims != NUTRITION_DIMS {
            return Err(Error::ShapeMismatch {
                what: "model hyperparameters".to_string(),
                expected: vec![k, NUTRITION_DIMS],
                actual: vec![self.model.num_classes, self.model.nutrition_dims],
            });
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::NotFound(format!("model metadata {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Model(format!("invalid metadata {}: {e}", path.display())))
    }
}

fn check_output(metadata: &ArtifactMetadata, name: &str, expected: &[usize]) -> Result<()> {
    match metadata.output_shape(name) {
        Some(shape) if shape == expected => Ok(()),
        Some(shape) => Err(Error::ShapeMismatch {
            what: format!("output '{name}'"),
            expected: expected.to_vec(),
            actual: shape.to_vec(),
        }),
        None => Err(Error::Model(format!("artifact has no output named '{name}'"))),
    }
}

/// Paths of an artifact directory
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn model(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
}

pub fn save_artifact<B: Backend>(
    model: &NutritionNet<B>,
    metadata: &ArtifactMetadata,
    dir: &Path,
) -> Result<()> {
    metadata.validate()?;
    fs::create_dir_all(dir)?;

    let recorder = CompactRecorder::new();
    model
        .clone()
        .save_file(dir.join(MODEL_STEM), &recorder)
        .map_err(|e| Error::Model(format!("Failed to save model: {e:?}")))?;
    metadata.save(&ArtifactPaths::new(dir).metadata())?;

    info!("Saved model artifact to {}", dir.display());
    Ok(())
}

/// Loads and validates an artifact; any missing file, decode error or shape
/// disagreement is an error.
pub fn load_artifact<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(NutritionNet<B>, ArtifactMetadata)> {
    let paths = ArtifactPaths::new(dir);
    let metadata = ArtifactMetadata::load(&paths.metadata())?;
    metadata.validate()?;

    if !paths.model().is_file() {
        return Err(Error::NotFound(format!(
            "model weights {}",
            paths.model().display()
        )));
    }

    let recorder = CompactRecorder::new();
    let model = metadata
        .model
        .init::<B>(device)
        .load_file(dir.join(MODEL_STEM), &recorder, device)
        .map_err(|e| Error::Model(format!("Failed to load model: {e:?}")))?;

    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::tensor_to_vec;
    use crate::test_support::{tiny_config, TestBackend};
    use burn::tensor::Tensor;
    use tempfile::tempdir;

    fn classes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("food_{i}")).collect()
    }

    #[test]
    fn test_metadata_contract() {
        let metadata = ArtifactMetadata::new(&tiny_config(3, 224), classes(3));
        assert_eq!(metadata.input_shape, [224, 224, 3]);
        assert_eq!(metadata.output_shape(CLASSIFICATION_OUTPUT), Some(&[3][..]));
        assert_eq!(metadata.output_shape(NUTRITION_OUTPUT), Some(&[7][..]));
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_metadata_detects_mismatch() {
        let metadata = ArtifactMetadata::new(&tiny_config(3, 224), classes(4));
        assert!(matches!(
            metadata.validate(),
            Err(Error::ShapeMismatch { .. })
        ));

        let mut metadata = ArtifactMetadata::new(&tiny_config(3, 224), classes(3));
        metadata.outputs.pop();
        assert!(matches!(metadata.validate(), Err(Error::Model(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let config = tiny_config(3, 32);
        let model: NutritionNet<TestBackend> = config.init(&device);

        let metadata = ArtifactMetadata::new(&config, classes(3)).with_epoch(4);
        save_artifact(&model, &metadata, dir.path()).unwrap();
        assert!(dir.path().join(MODEL_FILE).is_file());
        assert!(dir.path().join(METADATA_FILE).is_file());

        let (loaded, loaded_meta) = load_artifact::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(loaded_meta.class_names, classes(3));
        assert_eq!(loaded_meta.epoch, Some(4));

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let original = tensor_to_vec(model.infer(images.clone()).classification).unwrap();
        let restored = tensor_to_vec(loaded.infer(images).classification).unwrap();
        for (a, b) in original.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = tempdir().unwrap();
        let result = load_artifact::<TestBackend>(dir.path(), &Default::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
