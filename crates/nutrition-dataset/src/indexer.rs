//! Dataset indexing: split manifests to `(path, label)` pairs.
//!
//! A manifest maps each class to the identifiers of its images; the image
//! for `id` lives at `{images_root}/{id}.jpg`. Indexing keeps only entries
//! whose file exists and carves a reproducible validation subset out of the
//! training split.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nutrition_core::{Error, NutritionCatalog, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const IMAGE_EXTENSION: &str = "jpg";

/// `class -> [image_id]` mapping for one split.
///
/// Classes are enumerated in sorted order and image ids in listed order;
/// this enumeration is the manifest order used everywhere downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitManifest {
    classes: BTreeMap<String, Vec<String>>,
}

impl SplitManifest {
    /// Loads a manifest file. An absent file is a fatal
    /// [`Error::ManifestNotFound`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(Error::Io(e)),
        };
        Self::from_json_str(&content)
            .map_err(|e| Error::Dataset(format!("{}: {e}", path.display())))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Dataset(format!("Invalid manifest: {e}")))
    }

    pub fn insert(&mut self, class: impl Into<String>, image_ids: Vec<String>) {
        self.classes.insert(class.into(), image_ids);
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Total number of image ids across classes
    pub fn len(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(class, image_id)` pairs in manifest order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.classes
            .iter()
            .flat_map(|(class, ids)| ids.iter().map(move |id| (class.as_str(), id.as_str())))
    }
}

/// Parallel `paths` / `labels` sequences of one split.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedSplit {
    pub paths: Vec<PathBuf>,
    pub labels: Vec<String>,
    /// Manifest entries dropped because the file was missing
    pub skipped: usize,
}

impl IndexedSplit {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.paths
            .iter()
            .map(PathBuf::as_path)
            .zip(self.labels.iter().map(String::as_str))
    }

    /// Keeps the first `max` entries.
    pub fn truncate(&mut self, max: usize) {
        self.paths.truncate(max);
        self.labels.truncate(max);
    }

    /// Deterministic train/validation partition.
    ///
    /// `ceil(len * fraction)` entries are held out, chosen by a `ChaCha8Rng`
    /// permutation seeded with `seed`. Both halves keep manifest order.
    pub fn split_validation(&self, fraction: f64, seed: u64) -> (IndexedSplit, IndexedSplit) {
        let n = self.len();
        let n_val = (((n as f64) * fraction - 1e-9).ceil().max(0.0) as usize).min(n);

        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let mut held_out = vec![false; n];
        for &i in &order[..n_val] {
            held_out[i] = true;
        }

        let mut train = IndexedSplit::default();
        let mut validation = IndexedSplit::default();
        for (i, (path, label)) in self.paths.iter().zip(&self.labels).enumerate() {
            let target = if held_out[i] {
                &mut validation
            } else {
                &mut train
            };
            target.paths.push(path.clone());
            target.labels.push(label.clone());
        }
        train.skipped = self.skipped;

        (train, validation)
    }
}

/// Resolves manifest entries to image files on disk.
#[derive(Debug, Clone)]
pub struct DatasetIndexer {
    images_root: PathBuf,
}

impl DatasetIndexer {
    pub fn new(images_root: impl Into<PathBuf>) -> Self {
        Self {
            images_root: images_root.into(),
        }
    }

    pub fn image_path(&self, image_id: &str) -> PathBuf {
        self.images_root.join(format!("{image_id}.{IMAGE_EXTENSION}"))
    }

    /// Indexes a manifest, silently skipping entries without a file.
    pub fn index(&self, manifest: &SplitManifest) -> IndexedSplit {
        let mut split = IndexedSplit::default();

        for (class, image_id) in manifest.entries() {
            let path = self.image_path(image_id);
            if path.is_file() {
                split.paths.push(path);
                split.labels.push(class.to_string());
            } else {
                split.skipped += 1;
            }
        }

        if split.skipped > 0 {
            debug!(
                "Skipped {} of {} manifest entries with missing files",
                split.skipped,
                manifest.len()
            );
        }
        split
    }

    /// Verifies every manifest class against the catalog, then indexes.
    pub fn index_checked(
        &self,
        manifest: &SplitManifest,
        catalog: &NutritionCatalog,
    ) -> Result<IndexedSplit> {
        catalog.ensure_contains(manifest.class_names())?;
        let split = self.index(manifest);
        info!(
            "Indexed {} images across {} classes ({} missing)",
            split.len(),
            manifest.num_classes(),
            split.skipped
        );
        Ok(split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manifest_with(class: &str, n: usize) -> SplitManifest {
        let mut manifest = SplitManifest::default();
        manifest.insert(class, (0..n).map(|i| format!("{class}/{i}")).collect());
        manifest
    }

    #[test]
    fn test_missing_files_are_skipped_in_order() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pizza")).unwrap();
        for i in 0..10 {
            if i == 3 || i == 7 {
                continue;
            }
            fs::write(dir.path().join(format!("pizza/{i}.jpg")), b"jpg").unwrap();
        }

        let indexer = DatasetIndexer::new(dir.path());
        let split = indexer.index(&manifest_with("pizza", 10));

        assert_eq!(split.len(), 8);
        assert_eq!(split.skipped, 2);
        let expected: Vec<PathBuf> = [0, 1, 2, 4, 5, 6, 8, 9]
            .iter()
            .map(|i| dir.path().join(format!("pizza/{i}.jpg")))
            .collect();
        assert_eq!(split.paths, expected);
        assert!(split.labels.iter().all(|l| l == "pizza"));
    }

    #[test]
    fn test_manifest_not_found_is_fatal() {
        let dir = tempdir().unwrap();
        let err = SplitManifest::load(&dir.path().join("meta/train.json")).unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(_)));
        assert!(err.is_fatal_precondition());
    }

    #[test]
    fn test_manifest_order() {
        let manifest = SplitManifest::from_json_str(
            r#"{"sushi": ["sushi/2", "sushi/1"], "pizza": ["pizza/9"]}"#,
        )
        .unwrap();
        let entries: Vec<_> = manifest.entries().collect();
        assert_eq!(
            entries,
            vec![("pizza", "pizza/9"), ("sushi", "sushi/2"), ("sushi", "sushi/1")]
        );
        assert_eq!(manifest.len(), 3);
    }

    #[test]
    fn test_index_checked_rejects_unknown_class() {
        let dir = tempdir().unwrap();
        let catalog = NutritionCatalog::from_json_str(
            r#"{"pizza": {"calories": 266, "protein": 11, "fat": 10, "carbs": 33,
                "fiber": 2.3, "sugars": 3.6, "sodium": 598}}"#,
        )
        .unwrap();
        let indexer = DatasetIndexer::new(dir.path());

        let err = indexer
            .index_checked(&manifest_with("ramen", 2), &catalog)
            .unwrap_err();
        assert!(matches!(err, Error::CatalogMismatch(_)));
    }

    #[test]
    fn test_split_validation_is_deterministic() {
        let split = IndexedSplit {
            paths: (0..50).map(|i| PathBuf::from(format!("{i}.jpg"))).collect(),
            labels: (0..50).map(|i| format!("class_{}", i % 5)).collect(),
            skipped: 0,
        };

        let (train_a, val_a) = split.split_validation(0.1, 42);
        let (train_b, val_b) = split.split_validation(0.1, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
        assert_eq!(val_a.len(), 5);
        assert_eq!(train_a.len(), 45);

        // Disjoint and both in manifest order
        for path in &val_a.paths {
            assert!(!train_a.paths.contains(path));
        }
        let position = |p: &PathBuf| split.paths.iter().position(|q| q == p).unwrap();
        assert!(val_a.paths.windows(2).all(|w| position(&w[0]) < position(&w[1])));
        assert!(train_a.paths.windows(2).all(|w| position(&w[0]) < position(&w[1])));

        let (_, val_c) = split.split_validation(0.1, 7);
        assert_ne!(val_a, val_c);
    }

    #[test]
    fn test_split_validation_rounds_up() {
        let split = IndexedSplit {
            paths: (0..30).map(|i| PathBuf::from(format!("{i}.jpg"))).collect(),
            labels: vec!["a".to_string(); 30],
            skipped: 0,
        };
        assert_eq!(split.split_validation(0.1, 42).1.len(), 3);

        let small = IndexedSplit {
            paths: (0..4).map(|i| PathBuf::from(format!("{i}.jpg"))).collect(),
            labels: vec!["a".to_string(); 4],
            skipped: 0,
        };
        assert_eq!(small.split_validation(0.1, 42).1.len(), 1);
        assert_eq!(small.split_validation(0.0, 42).1.len(), 0);
    }
}
