//! Core types and utilities for food recognition and nutrition estimation.
//!
//! This crate provides the error taxonomy, the nutrition catalog, the
//! configuration structures and the metrics shared by the dataset,
//! training and inference crates.

pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use backend::*;
pub use catalog::NutritionCatalog;
pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use metrics::*;
pub use types::*;
