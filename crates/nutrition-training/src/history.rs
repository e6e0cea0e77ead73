//! Training log: one CSV row per epoch plus a JSON dump of the full
//! history at the end of a run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use nutrition_core::{EpochRecord, Error, Result, TrainingHistory};

fn csv_error(err: csv::Error) -> Error {
    Error::Serialization(format!("training log: {err}"))
}

/// Appends epoch records to `training_log.csv` as they are produced.
pub struct TrainingLog {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl TrainingLog {
    /// Creates (or truncates) the log file. The header row is written with
    /// the first record.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        Ok(Self { writer, path })
    }

    pub fn append(&mut self, record: &EpochRecord) -> Result<()> {
        self.writer.serialize(record).map_err(csv_error)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn read_training_log(path: &Path) -> Result<Vec<EpochRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    reader
        .deserialize()
        .map(|row| row.map_err(csv_error))
        .collect()
}

pub fn save_history(history: &TrainingHistory, path: &Path) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(history)?)?;
    Ok(())
}

pub fn load_history(path: &Path) -> Result<TrainingHistory> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(epoch: usize, val_accuracy: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            learning_rate: 0.001,
            train_loss: 2.5,
            train_classification_loss: 2.0,
            train_regression_loss: 1.0,
            train_accuracy: 0.4,
            train_top_k_accuracy: 0.8,
            train_mae: 35.0,
            train_mse: 4100.0,
            val_loss: 2.6,
            val_classification_loss: 2.1,
            val_regression_loss: 1.0,
            val_accuracy,
            val_top_k_accuracy: 0.75,
            val_mae: 38.0,
            val_mse: 4500.0,
        }
    }

    #[test]
    fn test_log_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run/training_log.csv");

        let mut log = TrainingLog::create(&path).unwrap();
        log.append(&record(1, 0.35)).unwrap();
        log.append(&record(2, 0.41)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("epoch,learning_rate,train_loss"));
        assert_eq!(content.lines().count(), 3);

        let rows = read_training_log(&path).unwrap();
        assert_eq!(rows, vec![record(1, 0.35), record(2, 0.41)]);
    }

    #[test]
    fn test_history_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("training_history.json");

        let mut history = TrainingHistory::new();
        history.push(record(1, 0.5));
        save_history(&history, &path).unwrap();

        let loaded = load_history(&path).unwrap();
        assert_eq!(loaded.epochs, history.epochs);
    }
}
