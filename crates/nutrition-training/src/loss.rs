//! Combined training objective.
//!
//! `loss = w_cls * categorical_cross_entropy + w_reg * mse`, with default
//! weights 1.0 and 0.5.

use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use nutrition_core::LossWeights;

use crate::model::DualOutput;

/// Loss terms of one batch
#[derive(Debug, Clone)]
pub struct DualLoss<B: Backend> {
    /// Weighted sum, the value to backpropagate
    pub total: Tensor<B, 1>,
    pub classification: Tensor<B, 1>,
    pub regression: Tensor<B, 1>,
}

/// Scalar loss values detached from the graph
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossValues {
    pub total: f64,
    pub classification: f64,
    pub regression: f64,
}

impl<B: Backend> DualLoss<B> {
    pub fn values(&self) -> LossValues {
        LossValues {
            total: self.total.clone().into_scalar().elem::<f64>(),
            classification: self.classification.clone().into_scalar().elem::<f64>(),
            regression: self.regression.clone().into_scalar().elem::<f64>(),
        }
    }
}

/// Categorical cross-entropy of logits against one-hot targets, averaged
/// over the batch.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (log_probs * targets).sum_dim(1).mean().neg()
}

#[derive(Debug, Clone, Copy)]
pub struct DualLossFn {
    weights: LossWeights,
}

impl DualLossFn {
    pub fn new(weights: LossWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    pub fn forward<B: Backend>(
        &self,
        output: &DualOutput<B>,
        one_hot: Tensor<B, 2>,
        nutrition: Tensor<B, 2>,
    ) -> DualLoss<B> {
        let classification = categorical_cross_entropy(output.classification.clone(), one_hot);
        let regression =
            MseLoss::new().forward(output.nutrition.clone(), nutrition, Reduction::Mean);

        let total = classification.clone().mul_scalar(self.weights.classification)
            + regression.clone().mul_scalar(self.weights.regression);

        DualLoss {
            total,
            classification,
            regression,
        }
    }
}

impl Default for DualLossFn {
    fn default() -> Self {
        Self::new(LossWeights::default())
    }
}
