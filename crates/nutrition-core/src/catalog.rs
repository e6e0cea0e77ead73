//! Nutrition catalog: the authoritative class list and regression targets.
//!
//! The catalog file maps every food class to its nutrition values. Its keys,
//! sorted lexicographically, define the class order used for indices,
//! one-hot targets and classification outputs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use tracing::info;

use crate::types::NutritionVector;
use crate::{Error, Result};

/// Immutable mapping from food class to index and nutrition values.
#[derive(Debug, Clone, PartialEq)]
pub struct NutritionCatalog {
    class_names: Vec<String>,
    nutrition: Vec<NutritionVector>,
    index: HashMap<String, usize>,
}

impl NutritionCatalog {
    /// Builds a catalog from `(class, nutrition)` entries in any order.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, NutritionVector)>,
    {
        let sorted: BTreeMap<String, NutritionVector> = entries.into_iter().collect();
        if sorted.is_empty() {
            return Err(Error::Config("Nutrition catalog is empty".to_string()));
        }

        let (class_names, nutrition): (Vec<_>, Vec<_>) = sorted.into_iter().unzip();
        let index = class_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(Self {
            class_names,
            nutrition,
            index,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: BTreeMap<String, NutritionVector> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid nutrition catalog: {e}")))?;
        Self::from_entries(entries)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read nutrition catalog {}: {e}",
                path.display()
            ))
        })?;
        let catalog = Self::from_json_str(&content)?;
        info!(
            "Loaded nutrition catalog with {} classes from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Writes the catalog as pretty JSON keyed by class name.
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let entries: BTreeMap<&str, &NutritionVector> = self
            .class_names
            .iter()
            .map(String::as_str)
            .zip(self.nutrition.iter())
            .collect();
        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Number of classes (K).
    pub fn len(&self) -> usize {
        self.class_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_names.is_empty()
    }

    /// Class names in index order.
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn class_name(&self, index: usize) -> Option<&str> {
        self.class_names.get(index).map(String::as_str)
    }

    pub fn nutrition(&self, index: usize) -> Option<&NutritionVector> {
        self.nutrition.get(index)
    }

    /// Looks up the class index and nutrition of a label.
    ///
    /// A label without catalog entry means the dataset and the catalog are
    /// out of sync, which is reported as [`Error::CatalogMismatch`].
    pub fn lookup(&self, name: &str) -> Result<(usize, NutritionVector)> {
        let index = self.class_index(name).ok_or_else(|| {
            Error::CatalogMismatch(format!("class '{name}' has no nutrition catalog entry"))
        })?;
        Ok((index, self.nutrition[index]))
    }

    pub fn nutrition_for(&self, name: &str) -> Result<NutritionVector> {
        self.lookup(name).map(|(_, nutrition)| nutrition)
    }

    /// Fails with the full list of classes missing from the catalog.
    pub fn ensure_contains<'a, I>(&self, classes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let missing: Vec<&str> = classes
            .into_iter()
            .filter(|c| !self.index.contains_key(*c))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::CatalogMismatch(format!(
                "{} dataset classes missing from nutrition catalog: {}",
                missing.len(),
                missing.join(", ")
            )))
        }
    }

    /// Compares a class list (from a model artifact) against the catalog.
    pub fn ensure_same_classes(&self, classes: &[String]) -> Result<()> {
        if classes == self.class_names.as_slice() {
            return Ok(());
        }
        Err(Error::CatalogMismatch(format!(
            "model was trained on {} classes, catalog defines {}",
            classes.len(),
            self.len()
        )))
    }
}
