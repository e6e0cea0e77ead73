//! Epoch-end training control: best-model selection, early stopping and
//! the learning rate schedule.

use nutrition_core::TrainingParams;
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::epoch::EpochSummary;
use crate::scheduler::{PlateauMode, ReduceOnPlateau};

/// Tracks the best value of a monitored metric.
#[derive(Debug, Clone)]
pub struct BestTracker {
    mode: PlateauMode,
    best: f64,
    best_epoch: Option<usize>,
    min_delta: f64,
}

impl BestTracker {
    pub fn new(mode: PlateauMode) -> Self {
        Self {
            mode,
            best: mode.initial(),
            best_epoch: None,
            min_delta: 0.0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Returns true when `value` beats every earlier value by more than
    /// `min_delta`.
    pub fn update(&mut self, epoch: usize, value: f64) -> bool {
        if self.mode.improves(value, self.best, self.min_delta) {
            self.best = value;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Stops after `patience` consecutive epochs without a lower validation
/// loss.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    tracker: BestTracker,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            tracker: BestTracker::new(PlateauMode::Min),
            wait: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.tracker = self.tracker.with_min_delta(min_delta);
        self
    }

    /// Records an epoch's validation loss; true when it is the best so far.
    pub fn update(&mut self, epoch: usize, val_loss: f64) -> bool {
        if self.tracker.update(epoch, val_loss) {
            debug!("Validation loss improved to {val_loss:.4}");
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            info!("No validation loss improvement. Patience: {}/{}", self.wait, self.patience);
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.patience > 0 && self.wait >= self.patience
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.tracker.best()
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.tracker.best_epoch()
    }
}

/// What the trainer does at the end of an epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochDecision {
    /// New best validation accuracy; the model goes to `best_model/`
    pub is_best: bool,
    /// Learning rate of the next epoch
    pub next_lr: f64,
    pub should_stop: bool,
}

/// Epoch-end control of one run. Keeps a copy of the weights with the
/// lowest validation loss so early stopping can restore them.
#[derive(Debug)]
pub struct EpochControl<M> {
    scheduler: ReduceOnPlateau,
    best_accuracy: BestTracker,
    early_stopping: EarlyStopping,
    best_loss_weights: Option<M>,
}

impl<M: Clone> EpochControl<M> {
    pub fn new(params: &TrainingParams) -> Self {
        Self {
            scheduler: ReduceOnPlateau::from_config(params.learning_rate, &params.lr_plateau),
            best_accuracy: BestTracker::new(PlateauMode::Max),
            early_stopping: EarlyStopping::new(params.early_stopping_patience)
                .with_min_delta(params.early_stopping_min_delta),
            best_loss_weights: None,
        }
    }

    /// Learning rate of the coming epoch
    pub fn lr(&self) -> f64 {
        self.scheduler.lr()
    }

    pub fn end_epoch(&mut self, epoch: usize, val: &EpochSummary, model: &M) -> EpochDecision {
        let next_lr = self.scheduler.step(val.loss);
        let is_best = self.best_accuracy.update(epoch, val.accuracy);
        if self.early_stopping.update(epoch, val.loss) {
            self.best_loss_weights = Some(model.clone());
        }
        EpochDecision {
            is_best,
            next_lr,
            should_stop: self.early_stopping.should_stop(),
        }
    }

    /// Training state after `epoch`, trained at `lr`.
    pub fn checkpoint(&self, epoch: usize, lr: f64, val: &EpochSummary) -> Checkpoint {
        Checkpoint::new(
            epoch,
            lr,
            val.loss,
            val.accuracy,
            self.early_stopping.best_loss().unwrap_or(val.loss),
            self.best_accuracy.best().unwrap_or(val.accuracy),
        )
    }

    /// Weights of the lowest validation loss and their epoch.
    pub fn take_best_loss_weights(&mut self) -> Option<(usize, M)> {
        let epoch = self.early_stopping.best_epoch()?;
        self.best_loss_weights.take().map(|weights| (epoch, weights))
    }

    pub fn best_accuracy(&self) -> &BestTracker {
        &self.best_accuracy
    }

    pub fn early_stopping(&self) -> &EarlyStopping {
        &self.early_stopping
    }
}
