//! Dataset statistics computation.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::indexer::IndexedSplit;

/// Class balance of an indexed split
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetStatistics {
    pub num_samples: usize,
    pub num_classes: usize,
    pub class_distribution: BTreeMap<String, usize>,
    pub skipped: usize,
}

impl DatasetStatistics {
    pub fn from_split(split: &IndexedSplit) -> Self {
        let mut class_distribution = BTreeMap::new();
        for label in &split.labels {
            *class_distribution.entry(label.clone()).or_insert(0) += 1;
        }

        Self {
            num_samples: split.len(),
            num_classes: class_distribution.len(),
            class_distribution,
            skipped: split.skipped,
        }
    }

    /// Largest over smallest class count (1.0 for empty splits)
    pub fn imbalance_ratio(&self) -> f64 {
        let max = self.class_distribution.values().copied().max().unwrap_or(0);
        let min = self.class_distribution.values().copied().min().unwrap_or(0);
        if min == 0 {
            1.0
        } else {
            max as f64 / min as f64
        }
    }

    pub fn log_summary(&self, name: &str) {
        info!(
            "{name}: {} samples, {} classes, imbalance {:.2}, {} missing files",
            self.num_samples,
            self.num_classes,
            self.imbalance_ratio(),
            self.skipped
        );
    }
}
