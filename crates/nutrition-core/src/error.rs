//! Error types shared by every crate in the workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for food recognition and nutrition estimation.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image could not be decoded or processed
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Model error
    #[error("Model error: {0}")]
    Model(String),

    /// Dataset error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Training error
    #[error("Training error: {0}")]
    Training(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A split manifest file is absent
    #[error("Dataset manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    /// Dataset labels and the nutrition catalog disagree
    #[error("Catalog mismatch: {0}")]
    CatalogMismatch(String),

    /// Model input resolution differs from the sample pipeline resolution
    #[error("Image size mismatch: model expects {model:?} (HWC), pipeline produces {pipeline:?}")]
    ImageSizeMismatch {
        model: [usize; 3],
        pipeline: [usize; 3],
    },

    /// A tensor or output vector has an unexpected shape
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// No model is loaded, the service runs in degraded mode
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Capability that has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation stopped through a stop signal
    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    /// Errors that must abort the current operation instead of being
    /// tolerated or turned into a fallback result.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(
            self,
            Error::ManifestNotFound(_)
                | Error::CatalogMismatch(_)
                | Error::ImageSizeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::InvalidImage(err.to_string())
    }
}

/// Specialized Result type for the workspace.
pub type Result<T> = std::result::Result<T, Error>;
