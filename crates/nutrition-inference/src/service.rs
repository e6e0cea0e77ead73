//! Inference facade used by a serving layer: `predict`, `model_status`,
//! `reload`, plus portion estimation.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use burn::tensor::backend::Backend;
use nutrition_core::{Error, NutritionCatalog, Result, ServiceConfig};
use nutrition_dataset::{images_to_tensor, ImageInput, PipelineMode, SamplePipeline};
use nutrition_training::epoch::tensor_to_vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::lifecycle::{ModelManager, ModelStatus};
use crate::postprocess::{build_prediction, NutritionBreakdown, PredictionResult};

/// Returned instead of a prediction when one request fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackPrediction {
    pub food: String,
    pub confidence: f32,
    pub error: String,
}

impl FallbackPrediction {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            food: "unknown".to_string(),
            confidence: 0.0,
            error: error.into(),
        }
    }
}

/// Outcome of [`InferenceService::predict`], tagged `"status": "ok"` or
/// `"status": "fallback"` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionResponse {
    Ok(PredictionResult),
    Fallback(FallbackPrediction),
}

impl PredictionResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, PredictionResponse::Ok(_))
    }

    pub fn prediction(&self) -> Option<&PredictionResult> {
        match self {
            PredictionResponse::Ok(result) => Some(result),
            PredictionResponse::Fallback(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortionSize {
    Small,
    Medium,
    Large,
}

impl PortionSize {
    /// Brightness thresholds 0.6 and 0.4
    pub fn from_brightness(brightness: f32) -> Self {
        if brightness > 0.6 {
            PortionSize::Large
        } else if brightness > 0.4 {
            PortionSize::Medium
        } else {
            PortionSize::Small
        }
    }

    pub fn multiplier(self) -> f32 {
        match self {
            PortionSize::Small => 0.7,
            PortionSize::Medium => 1.0,
            PortionSize::Large => 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortionEstimate {
    pub portion_size: PortionSize,
    pub portion_multiplier: f32,
    /// Mean pixel intensity in `[0, 1]`
    pub brightness: f32,
    /// Prediction nutrition scaled by the multiplier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionBreakdown>,
}

pub struct InferenceService<B: Backend> {
    manager: ModelManager<B>,
    catalog: Arc<NutritionCatalog>,
    pipeline: SamplePipeline,
}

impl<B: Backend> InferenceService<B> {
    pub fn new(config: &ServiceConfig, catalog: Arc<NutritionCatalog>, device: B::Device) -> Self {
        let manager = ModelManager::from_config(config, Arc::clone(&catalog), device);
        let pipeline =
            SamplePipeline::new(Arc::clone(&catalog), config.image_size, PipelineMode::Inference);
        Self {
            manager,
            catalog,
            pipeline,
        }
    }

    /// Loads the catalog and makes one attempt to load the model. A missing
    /// or broken model leaves the service running in degraded mode; a
    /// missing catalog is an error.
    pub fn start(config: &ServiceConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(NutritionCatalog::from_json_file(&config.catalog_path)?);
        info!(
            "Catalog loaded from {} ({} classes)",
            config.catalog_path.display(),
            catalog.len()
        );

        let service = Self::new(config, catalog, device);
        if service.manager.load().is_err() {
            info!("Inference service started without a model");
        }
        Ok(service)
    }

    pub fn catalog(&self) -> &NutritionCatalog {
        &self.catalog
    }

    pub fn manager(&self) -> &ModelManager<B> {
        &self.manager
    }

    pub fn artifact_dir(&self) -> &Path {
        self.manager.artifact_dir()
    }

    /// Prediction with typed errors.
    pub fn try_predict(&self, input: ImageInput) -> Result<PredictionResult> {
        let active = self.manager.active()?;
        let prepared = self.pipeline.prepare_inference(input)?;
        let model = active.model()?;

        let start = Instant::now();
        let images = images_to_tensor::<B>(prepared.image, 1, self.pipeline.dims(), active.device());
        let output = model.infer(images);
        let probs = tensor_to_vec(output.classification)?;
        let nutrition = tensor_to_vec(output.nutrition)?;

        let mut result = build_prediction(&probs, &nutrition, &self.catalog)?;
        result.inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Predicted {} ({:.3}) in {:.1} ms",
            result.detected_food.name, result.detected_food.confidence, result.inference_time_ms
        );
        Ok(result)
    }

    /// Prediction for a serving layer.
    ///
    /// `Err(ModelUnavailable)` means no model is loaded; any other failure
    /// of this one request becomes a [`PredictionResponse::Fallback`].
    pub fn predict(&self, input: ImageInput) -> Result<PredictionResponse> {
        match self.try_predict(input) {
            Ok(result) => Ok(PredictionResponse::Ok(result)),
            Err(e @ Error::ModelUnavailable(_)) => Err(e),
            Err(e) => {
                error!("Prediction failed: {e}");
                Ok(PredictionResponse::Fallback(FallbackPrediction::new(e.to_string())))
            }
        }
    }

    pub fn model_status(&self) -> ModelStatus {
        self.manager.status()
    }

    pub fn reload(&self) -> Result<()> {
        self.manager.reload()
    }

    /// Image embeddings are not produced by this model.
    pub fn extract_features(&self, _input: ImageInput) -> Result<Vec<f32>> {
        Err(Error::NotImplemented(
            "feature extraction is not available for this model".to_string(),
        ))
    }

    /// Brightness-based portion heuristic. With a prediction, its nutrition
    /// is scaled by the portion multiplier.
    pub fn estimate_portion(
        &self,
        input: ImageInput,
        prediction: Option<&PredictionResult>,
    ) -> Result<PortionEstimate> {
        let image = input.decode()?.to_rgb8();
        let values = image.as_raw();
        if values.is_empty() {
            return Err(Error::InvalidImage("image has no pixels".to_string()));
        }
        let brightness =
            (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64 / 255.0) as f32;

        let portion_size = PortionSize::from_brightness(brightness);
        let portion_multiplier = portion_size.multiplier();
        Ok(PortionEstimate {
            portion_size,
            portion_multiplier,
            brightness,
            nutrition: prediction.map(|p| p.nutrition.scaled(portion_multiplier)),
        })
    }
}
