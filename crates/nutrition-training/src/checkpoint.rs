//! Checkpointing of the best and final models plus training state.

use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use chrono::Utc;
use nutrition_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::{save_artifact, ArtifactMetadata};
use crate::model::NutritionNet;

/// Training state written next to saved models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub learning_rate: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub best_val_loss: f64,
    pub best_val_accuracy: f64,
    pub timestamp: String,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        learning_rate: f64,
        val_loss: f64,
        val_accuracy: f64,
        best_val_loss: f64,
        best_val_accuracy: f64,
    ) -> Self {
        Self {
            epoch,
            learning_rate,
            val_loss,
            val_accuracy,
            best_val_loss,
            best_val_accuracy,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize checkpoint: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize checkpoint: {e}")))
    }
}

/// Owns the layout of a run's output directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    output_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn best_model_dir(&self) -> PathBuf {
        self.output_dir.join("best_model")
    }

    pub fn final_model_dir(&self) -> PathBuf {
        self.output_dir.join("final_model")
    }

    fn latest_path(&self) -> PathBuf {
        self.output_dir.join("latest.json")
    }

    fn best_state_path(&self) -> PathBuf {
        self.best_model_dir().join("checkpoint.json")
    }

    /// Overwrites the best model artifact and its training state.
    pub fn save_best<B: Backend>(
        &self,
        model: &NutritionNet<B>,
        metadata: &ArtifactMetadata,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        let dir = self.best_model_dir();
        save_artifact(model, &metadata.clone().with_epoch(checkpoint.epoch), &dir)?;
        checkpoint.save(&self.best_state_path())?;
        info!(
            "Best model (val accuracy {:.4}) saved at epoch {}",
            checkpoint.val_accuracy, checkpoint.epoch
        );
        Ok(())
    }

    pub fn save_final<B: Backend>(
        &self,
        model: &NutritionNet<B>,
        metadata: &ArtifactMetadata,
    ) -> Result<()> {
        save_artifact(model, metadata, &self.final_model_dir())
    }

    pub fn save_latest(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.save(&self.latest_path())
    }

    pub fn load_latest(&self) -> Result<Checkpoint> {
        Checkpoint::load(&self.latest_path())
    }

    pub fn load_best(&self) -> Result<Checkpoint> {
        Checkpoint::load(&self.best_state_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{load_artifact, METADATA_FILE};
    use crate::test_support::{tiny_config, TestBackend};
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_save_load() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state/latest.json");

        let original = Checkpoint::new(10, 0.0005, 1.2, 0.61, 1.1, 0.63);
        original.save(&path)?;
        let loaded = Checkpoint::load(&path)?;

        assert_eq!(loaded, original);
        Ok(())
    }

    #[test]
    fn test_manager_layout() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path());
        let device = Default::default();
        let config = tiny_config(2, 32);
        let model: NutritionNet<TestBackend> = config.init(&device);
        let metadata = ArtifactMetadata::new(&config, vec!["pizza".into(), "sushi".into()]);

        let checkpoint = Checkpoint::new(3, 0.001, 0.9, 0.7, 0.9, 0.7);
        manager.save_best(&model, &metadata, &checkpoint)?;
        manager.save_latest(&checkpoint)?;
        manager.save_final(&model, &metadata)?;

        assert!(manager.best_model_dir().join(METADATA_FILE).is_file());
        assert!(manager.final_model_dir().join(METADATA_FILE).is_file());
        assert_eq!(manager.load_best()?.epoch, 3);
        assert_eq!(manager.load_latest()?, checkpoint);

        let (_, best_meta) = load_artifact::<TestBackend>(&manager.best_model_dir(), &device)?;
        assert_eq!(best_meta.epoch, Some(3));
        Ok(())
    }
}
