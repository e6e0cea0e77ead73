//! Per-epoch metric accumulation: accuracy, top-k accuracy, nutrition
//! MAE/MSE and the three loss terms.

use burn::tensor::{backend::Backend, Int, Tensor};
use nutrition_core::{Error, NutrientErrors, Result, NUTRITION_DIMS};
use nutrition_dataset::argmax;
use serde::{Deserialize, Serialize};

use crate::loss::LossValues;
use crate::model::DualOutput;

/// Whether `label` is among the `k` highest scores. Classes tied with the
/// label do not push it out.
pub fn in_top_k(scores: &[f32], label: usize, k: usize) -> bool {
    let Some(&target) = scores.get(label) else {
        return false;
    };
    let higher = scores.iter().filter(|&&s| s > target).count();
    higher < k
}

/// Downloads a float tensor as a flat `f32` vector.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Training(format!("Failed to read tensor: {e:?}")))
}

pub fn labels_to_vec<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|v| v.into_iter().map(|i| i as usize).collect())
        .map_err(|e| Error::Training(format!("Failed to read labels: {e:?}")))
}

/// Averages of one pass over a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub loss: f64,
    pub classification_loss: f64,
    pub regression_loss: f64,
    pub accuracy: f64,
    pub top_k_accuracy: f64,
    pub mae: f64,
    pub mse: f64,
    pub samples: usize,
}

#[derive(Debug, Clone)]
pub struct EpochAccumulator {
    top_k: usize,
    samples: usize,
    correct: usize,
    top_k_hits: usize,
    loss_sums: LossValues,
    nutrition: NutrientErrors,
}

impl EpochAccumulator {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            samples: 0,
            correct: 0,
            top_k_hits: 0,
            loss_sums: LossValues::default(),
            nutrition: NutrientErrors::new(),
        }
    }

    /// Adds one batch given host-side scores `[n * k]`, labels `[n]` and
    /// nutrition predictions/targets `[n * 7]`. Losses are batch means.
    pub fn record(
        &mut self,
        scores: &[f32],
        labels: &[usize],
        nutrition_pred: &[f32],
        nutrition_true: &[f32],
        loss: LossValues,
    ) {
        let n = labels.len();
        if n == 0 {
            return;
        }
        let k = scores.len() / n;

        for (i, &label) in labels.iter().enumerate() {
            let row = &scores[i * k..(i + 1) * k];
            if argmax(row) == Some(label) {
                self.correct += 1;
            }
            if in_top_k(row, label, self.top_k) {
                self.top_k_hits += 1;
            }
        }

        for (pred, actual) in nutrition_pred
            .chunks_exact(NUTRITION_DIMS)
            .zip(nutrition_true.chunks_exact(NUTRITION_DIMS))
        {
            let pred: Option<&[f32; NUTRITION_DIMS]> = pred.try_into().ok();
            let actual: Option<&[f32; NUTRITION_DIMS]> = actual.try_into().ok();
            if let (Some(pred), Some(actual)) = (pred, actual) {
                self.nutrition.record(pred, actual);
            }
        }

        let weight = n as f64;
        self.loss_sums.total += loss.total * weight;
        self.loss_sums.classification += loss.classification * weight;
        self.loss_sums.regression += loss.regression * weight;
        self.samples += n;
    }

    /// Pulls a batch's outputs to the host and records them.
    pub fn record_output<B: Backend>(
        &mut self,
        output: DualOutput<B>,
        class_indices: Tensor<B, 1, Int>,
        nutrition_true: Tensor<B, 2>,
        loss: LossValues,
    ) -> Result<()> {
        let scores = tensor_to_vec(output.classification)?;
        let nutrition_pred = tensor_to_vec(output.nutrition)?;
        let nutrition_true = tensor_to_vec(nutrition_true)?;
        let labels = labels_to_vec(class_indices)?;
        self.record(&scores, &labels, &nutrition_pred, &nutrition_true, loss);
        Ok(())
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn summary(&self) -> EpochSummary {
        if self.samples == 0 {
            return EpochSummary::default();
        }
        let n = self.samples as f64;
        EpochSummary {
            loss: self.loss_sums.total / n,
            classification_loss: self.loss_sums.classification / n,
            regression_loss: self.loss_sums.regression / n,
            accuracy: self.correct as f64 / n,
            top_k_accuracy: self.top_k_hits as f64 / n,
            mae: self.nutrition.mae(),
            mse: self.nutrition.mse(),
            samples: self.samples,
        }
    }
}
