//! Evaluation and training metrics.

use serde::{Deserialize, Serialize};

use crate::types::{NUTRIENT_FIELDS, NUTRITION_DIMS};

/// Classification metrics built from a confusion matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Overall accuracy
    pub accuracy: f64,
    /// Top-k accuracy
    pub top_k_accuracy: f64,
    /// K used for `top_k_accuracy`
    pub top_k: usize,
    /// Per-class precision, indexed by class
    pub per_class_precision: Vec<f64>,
    /// Per-class recall, indexed by class
    pub per_class_recall: Vec<f64>,
    /// Per-class F1 score, indexed by class
    pub per_class_f1: Vec<f64>,
    /// Samples per true class
    pub per_class_support: Vec<usize>,
    /// Confusion matrix (actual x predicted)
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Total number of samples evaluated
    pub num_samples: usize,
    top_k_hits: usize,
}

impl EvaluationMetrics {
    pub fn new(num_classes: usize, top_k: usize) -> Self {
        Self {
            accuracy: 0.0,
            top_k_accuracy: 0.0,
            top_k,
            per_class_precision: vec![0.0; num_classes],
            per_class_recall: vec![0.0; num_classes],
            per_class_f1: vec![0.0; num_classes],
            per_class_support: vec![0; num_classes],
            confusion_matrix: vec![vec![0; num_classes]; num_classes],
            num_samples: 0,
            top_k_hits: 0,
        }
    }

    /// Records one prediction; `in_top_k` tells whether the true class was
    /// among the k most probable classes.
    pub fn record(&mut self, actual: usize, predicted: usize, in_top_k: bool) {
        let n = self.confusion_matrix.len();
        if actual < n && predicted < n {
            self.confusion_matrix[actual][predicted] += 1;
            if in_top_k {
                self.top_k_hits += 1;
            }
        }
    }

    pub fn macro_precision(&self) -> f64 {
        mean(&self.per_class_precision)
    }

    pub fn macro_recall(&self) -> f64 {
        mean(&self.per_class_recall)
    }

    pub fn macro_f1(&self) -> f64 {
        mean(&self.per_class_f1)
    }

    /// Computes accuracy and per-class scores from the confusion matrix.
    pub fn compute_from_confusion_matrix(&mut self) {
        let num_classes = self.confusion_matrix.len();
        self.num_samples = self.confusion_matrix.iter().flatten().sum();

        if self.num_samples == 0 {
            return;
        }

        let correct: usize = (0..num_classes).map(|i| self.confusion_matrix[i][i]).sum();
        self.accuracy = correct as f64 / self.num_samples as f64;
        self.top_k_accuracy = self.top_k_hits as f64 / self.num_samples as f64;

        for class_id in 0..num_classes {
            let true_positives = self.confusion_matrix[class_id][class_id] as f64;
            let predicted_total: usize = (0..num_classes)
                .map(|i| self.confusion_matrix[i][class_id])
                .sum();
            let actual_total: usize = self.confusion_matrix[class_id].iter().sum();

            let precision = if predicted_total > 0 {
                true_positives / predicted_total as f64
            } else {
                0.0
            };
            let recall = if actual_total > 0 {
                true_positives / actual_total as f64
            } else {
                0.0
            };
            let f1 = if precision + recall > 0.0 {
                2.0 * (precision * recall) / (precision + recall)
            } else {
                0.0
            };

            self.per_class_precision[class_id] = precision;
            self.per_class_recall[class_id] = recall;
            self.per_class_f1[class_id] = f1;
            self.per_class_support[class_id] = actual_total;
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Per-nutrient absolute and percentage errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NutrientErrors {
    abs_error_sum: [f64; NUTRITION_DIMS],
    pct_error_sum: [f64; NUTRITION_DIMS],
    sq_error_sum: f64,
    count: usize,
}

/// Summary for one nutrient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NutrientScore {
    pub nutrient: String,
    pub mae: f64,
    pub mape: f64,
}

impl NutrientErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one predicted/true pair of nutrition vectors.
    pub fn record(&mut self, predicted: &[f32; NUTRITION_DIMS], actual: &[f32; NUTRITION_DIMS]) {
        for i in 0..NUTRITION_DIMS {
            let err = (predicted[i] as f64 - actual[i] as f64).abs();
            self.abs_error_sum[i] += err;
            self.pct_error_sum[i] += err / (actual[i].abs() as f64 + 1e-8) * 100.0;
            self.sq_error_sum += err * err;
        }
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean absolute error over all nutrients and samples
    pub fn mae(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.abs_error_sum.iter().sum::<f64>() / (self.count * NUTRITION_DIMS) as f64
    }

    /// Mean squared error over all nutrients and samples
    pub fn mse(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sq_error_sum / (self.count * NUTRITION_DIMS) as f64
    }

    pub fn per_nutrient(&self) -> Vec<NutrientScore> {
        let n = self.count.max(1) as f64;
        NUTRIENT_FIELDS
            .iter()
            .enumerate()
            .map(|(i, name)| NutrientScore {
                nutrient: name.to_string(),
                mae: self.abs_error_sum[i] / n,
                mape: self.pct_error_sum[i] / n,
            })
            .collect()
    }
}

/// Metrics of one training epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_classification_loss: f64,
    pub train_regression_loss: f64,
    pub train_accuracy: f64,
    pub train_top_k_accuracy: f64,
    pub train_mae: f64,
    pub train_mse: f64,
    pub val_loss: f64,
    pub val_classification_loss: f64,
    pub val_regression_loss: f64,
    pub val_accuracy: f64,
    pub val_top_k_accuracy: f64,
    pub val_mae: f64,
    pub val_mse: f64,
}

/// Training metrics tracked across epochs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs.iter().map(|e| e.val_accuracy).reduce(f64::max)
    }

    /// Epoch with the best validation accuracy (first one on ties)
    pub fn best_epoch(&self) -> Option<usize> {
        let mut best: Option<&EpochRecord> = None;
        for record in &self.epochs {
            if best.map_or(true, |b| record.val_accuracy > b.val_accuracy) {
                best = Some(record);
            }
        }
        best.map(|r| r.epoch)
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.epochs.iter().map(|e| e.val_loss).reduce(f64::min)
    }
}
