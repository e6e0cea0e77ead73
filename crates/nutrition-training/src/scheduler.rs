//! Reduce-on-plateau learning rate schedule.

use nutrition_core::PlateauConfig;
use serde::{Deserialize, Serialize};

/// Direction in which the monitored metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateauMode {
    /// Metric should decrease (loss)
    Min,
    /// Metric should increase (accuracy)
    Max,
}

impl PlateauMode {
    pub fn initial(self) -> f64 {
        match self {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        }
    }

    /// Whether `candidate` beats `best` by more than `min_delta`.
    pub fn improves(self, candidate: f64, best: f64, min_delta: f64) -> bool {
        match self {
            PlateauMode::Min => candidate < best - min_delta,
            PlateauMode::Max => candidate > best + min_delta,
        }
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs
/// without improvement, never going below `min_lr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceOnPlateau {
    best_metric: f64,
    epochs_without_improvement: usize,
    current_lr: f64,
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    mode: PlateauMode,
}

impl ReduceOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize, min_lr: f64, mode: PlateauMode) -> Self {
        Self {
            best_metric: mode.initial(),
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            factor,
            patience,
            min_lr,
            min_delta: 0.0,
            mode,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Watches validation loss.
    pub fn from_config(initial_lr: f64, config: &PlateauConfig) -> Self {
        Self::new(
            initial_lr,
            config.factor,
            config.patience,
            config.min_lr,
            PlateauMode::Min,
        )
        .with_min_delta(config.min_delta)
    }

    /// Updates with an epoch's metric and returns the learning rate for the
    /// next epoch.
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.mode.improves(metric, self.best_metric, self.min_delta) {
            self.best_metric = metric;
            self.epochs_without_improvement = 0;
        } else {
            self.epochs_without_improvement += 1;

            if self.epochs_without_improvement >= self.patience {
                let new_lr = (self.current_lr * self.factor).max(self.min_lr);
                if new_lr < self.current_lr {
                    tracing::info!(
                        "Reducing learning rate from {:.2e} to {:.2e}",
                        self.current_lr,
                        new_lr
                    );
                    self.current_lr = new_lr;
                }
                self.epochs_without_improvement = 0;
            }
        }

        self.current_lr
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }
}
