//! Dual-head model, training loop and evaluation for food classification
//! with nutrition regression.

pub mod artifact;
pub mod callbacks;
pub mod checkpoint;
pub mod epoch;
pub mod evaluator;
pub mod history;
pub mod loss;
pub mod model;
pub mod scheduler;
pub mod trainer;

#[cfg(test)]
pub(crate) mod test_support;

pub use artifact::{load_artifact, save_artifact, ArtifactMetadata, ArtifactPaths, OutputSpec};
pub use callbacks::{BestTracker, EarlyStopping, EpochControl, EpochDecision};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use epoch::{EpochAccumulator, EpochSummary};
pub use evaluator::{evaluate_split, ClassReport, EvalOptions, EvaluationReport, Evaluator};
pub use history::{load_history, read_training_log, save_history, TrainingLog};
pub use loss::{DualLoss, DualLossFn, LossValues};
pub use model::{
    DualOutput, NutritionNet, NutritionNetConfig, CLASSIFICATION_OUTPUT, NUTRITION_OUTPUT,
};
pub use scheduler::{PlateauMode, ReduceOnPlateau};
pub use trainer::{
    SilentObserver, Trainer, TrainingData, TrainingObserver, TrainingOutcome,
};
