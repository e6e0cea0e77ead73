//! Model lifecycle: `Unloaded -> Loading -> Loaded | Failed`.
//!
//! The manager owns the active model behind an `Arc`. Readers clone the
//! `Arc` under a briefly held read lock; a (re)load builds the new model
//! without holding any lock and swaps the pointer under the write lock, so
//! in-flight predictions finish on the model they started with.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use burn::tensor::backend::Backend;
use chrono::{DateTime, Utc};
use nutrition_core::{Error, ImageDimensions, NutritionCatalog, Result, ServiceConfig};
use nutrition_training::{load_artifact, ArtifactMetadata, NutritionNet, OutputSpec};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Loaded,
    /// Degraded mode: no model could be loaded
    Failed,
}

/// Description of the active model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub outputs: Vec<OutputSpec>,
    pub class_names: Vec<String>,
    pub artifact_path: PathBuf,
    pub trained_epoch: Option<usize>,
    pub loaded_at: DateTime<Utc>,
}

impl ModelMetadata {
    fn from_artifact(metadata: ArtifactMetadata, artifact_path: &Path) -> Self {
        Self {
            input_shape: metadata.input_shape,
            outputs: metadata.outputs,
            class_names: metadata.class_names,
            artifact_path: artifact_path.to_path_buf(),
            trained_epoch: metadata.epoch,
            loaded_at: Utc::now(),
        }
    }
}

/// A loaded network plus its metadata.
///
/// The network sits behind a mutex that is only held to clone it, so
/// predictions run concurrently on their own copies.
pub struct LoadedModel<B: Backend> {
    model: Mutex<NutritionNet<B>>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> LoadedModel<B> {
    pub fn new(model: NutritionNet<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            metadata,
            device,
        }
    }

    /// A copy of the network for one request.
    pub fn model(&self) -> Result<NutritionNet<B>> {
        self.model
            .lock()
            .map(|model| model.clone())
            .map_err(|_| Error::Model("model lock poisoned".to_string()))
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// Snapshot returned by [`ModelManager::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub state: LifecycleState,
    pub metadata: Option<ModelMetadata>,
    pub last_error: Option<String>,
}

impl ModelStatus {
    pub fn is_available(&self) -> bool {
        self.metadata.is_some()
    }
}

struct Inner<B: Backend> {
    phase: LifecycleState,
    active: Option<Arc<LoadedModel<B>>>,
    last_error: Option<String>,
}

pub struct ModelManager<B: Backend> {
    artifact_dir: PathBuf,
    catalog: Arc<NutritionCatalog>,
    dims: ImageDimensions,
    device: B::Device,
    inner: RwLock<Inner<B>>,
    /// Serializes load attempts
    loading: Mutex<()>,
}

impl<B: Backend> ModelManager<B> {
    pub fn new(
        artifact_dir: impl Into<PathBuf>,
        catalog: Arc<NutritionCatalog>,
        dims: ImageDimensions,
        device: B::Device,
    ) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            catalog,
            dims,
            device,
            inner: RwLock::new(Inner {
                phase: LifecycleState::Unloaded,
                active: None,
                last_error: None,
            }),
            loading: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &ServiceConfig,
        catalog: Arc<NutritionCatalog>,
        device: B::Device,
    ) -> Self {
        Self::new(&config.model_dir, catalog, config.image_size, device)
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// One load attempt. On failure the state becomes `Failed` unless an
    /// earlier model is still active, which then keeps serving.
    pub fn load(&self) -> Result<()> {
        let _guard = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        self.write().phase = LifecycleState::Loading;
        info!("Loading model from {}", self.artifact_dir.display());

        match self.try_load() {
            Ok(loaded) => {
                let classes = loaded.metadata.class_names.len();
                let mut inner = self.write();
                inner.active = Some(Arc::new(loaded));
                inner.phase = LifecycleState::Loaded;
                inner.last_error = None;
                info!("Model loaded ({classes} classes)");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.write();
                inner.last_error = Some(e.to_string());
                if inner.active.is_some() {
                    inner.phase = LifecycleState::Loaded;
                    warn!("Model reload failed, keeping the previous model: {e}");
                } else {
                    inner.phase = LifecycleState::Failed;
                    error!("Model load failed, running in degraded mode: {e}");
                }
                Err(e)
            }
        }
    }

    /// Explicit reload; also the way out of `Failed`.
    pub fn reload(&self) -> Result<()> {
        self.load()
    }

    fn try_load(&self) -> Result<LoadedModel<B>> {
        let (model, metadata) = load_artifact::<B>(&self.artifact_dir, &self.device)?;
        self.catalog.ensure_same_classes(&metadata.class_names)?;

        let expected = self.dims.hwc();
        if metadata.input_shape != expected {
            return Err(Error::ImageSizeMismatch {
                model: metadata.input_shape,
                pipeline: expected,
            });
        }

        Ok(LoadedModel::new(
            model,
            ModelMetadata::from_artifact(metadata, &self.artifact_dir),
            self.device.clone(),
        ))
    }

    /// Current state; never triggers a load.
    pub fn status(&self) -> ModelStatus {
        let inner = self.read();
        ModelStatus {
            state: inner.phase,
            metadata: inner.active.as_ref().map(|m| m.metadata.clone()),
            last_error: inner.last_error.clone(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.read().phase
    }

    /// The model serving requests right now.
    pub fn active(&self) -> Result<Arc<LoadedModel<B>>> {
        let inner = self.read();
        match &inner.active {
            Some(model) => Ok(Arc::clone(model)),
            None => Err(Error::ModelUnavailable(match &inner.last_error {
                Some(reason) => reason.clone(),
                None => format!("no model loaded ({:?})", inner.phase),
            })),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner<B>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner<B>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
