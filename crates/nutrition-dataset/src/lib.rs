//! Dataset handling for food recognition and nutrition estimation.
//!
//! Turns split manifests into `(path, label)` pairs, and those pairs into
//! batched, prefetched samples carrying an image, a class index and the
//! class's nutrition vector.

pub mod augmentation;
pub mod batcher;
pub mod indexer;
pub mod preprocess;
pub mod sample;
pub mod statistics;
pub mod stream;

pub use augmentation::Augmenter;
pub use batcher::{images_to_tensor, NutritionBatch, NutritionBatcher};
pub use indexer::{DatasetIndexer, IndexedSplit, SplitManifest};
pub use preprocess::{ImageInput, ImagePreprocessor};
pub use sample::{argmax, one_hot, InferenceInput, PipelineMode, Sample, SamplePipeline};
pub use statistics::DatasetStatistics;
pub use stream::{buffered_shuffle, SampleStream, StopSignal, StreamConfig};
