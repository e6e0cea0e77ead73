//! Inference side of the nutrition model: post-processing of the two
//! outputs, model lifecycle with degraded mode, and a service facade.

pub mod lifecycle;
pub mod postprocess;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use lifecycle::{LifecycleState, LoadedModel, ModelManager, ModelMetadata, ModelStatus};
pub use postprocess::{
    build_prediction, negative_nutrients, rank_top_k, FoodPrediction, NutritionBreakdown,
    PredictionResult, TOP_K,
};
pub use service::{
    FallbackPrediction, InferenceService, PortionEstimate, PortionSize, PredictionResponse,
};
