//! Evaluation passes over an indexed split.
//!
//! [`evaluate_split`] is the ordered, augmentation-free pass used both for
//! per-epoch validation and for the final test-set report built by
//! [`Evaluator`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use chrono::{DateTime, Utc};
use nutrition_core::{
    Error, EvaluationMetrics, NutrientErrors, NutrientScore, Result, NUTRITION_DIMS,
};
use nutrition_dataset::{
    argmax, IndexedSplit, NutritionBatch, NutritionBatcher, PipelineMode, SamplePipeline,
    SampleStream, StopSignal, StreamConfig,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::load_artifact;
use crate::epoch::{in_top_k, labels_to_vec, tensor_to_vec, EpochAccumulator, EpochSummary};
use crate::loss::DualLossFn;
use crate::model::NutritionNet;

/// Host-side outputs of one evaluated batch
#[derive(Debug)]
pub struct BatchOutputs<'a> {
    /// Softmax probabilities `[n * K]`
    pub probabilities: &'a [f32],
    pub labels: &'a [usize],
    /// `[n * 7]`
    pub nutrition_pred: &'a [f32],
    /// `[n * 7]`
    pub nutrition_true: &'a [f32],
}

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub batch_size: usize,
    pub prefetch: usize,
    pub top_k: usize,
    pub loss: DualLossFn,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            prefetch: 4,
            top_k: 5,
            loss: DualLossFn::default(),
        }
    }
}

/// Runs `model` over `split` in order and returns the averaged metrics.
/// `inspect` sees every batch after it has been recorded.
pub fn evaluate_split<B, F>(
    model: &NutritionNet<B>,
    pipeline: &Arc<SamplePipeline>,
    split: &Arc<IndexedSplit>,
    options: &EvalOptions,
    device: &B::Device,
    stop: &StopSignal,
    mut inspect: F,
) -> Result<EpochSummary>
where
    B: Backend,
    F: FnMut(&BatchOutputs),
{
    let pipeline = match pipeline.mode() {
        PipelineMode::Training => Arc::new(pipeline.evaluation()),
        _ => Arc::clone(pipeline),
    };
    let batcher = NutritionBatcher::new(pipeline.num_classes(), pipeline.dims());
    let stream = SampleStream::spawn(
        Arc::clone(&pipeline),
        Arc::clone(split),
        StreamConfig::evaluation(options.batch_size, options.prefetch),
        stop.clone(),
    );

    let mut accumulator = EpochAccumulator::new(options.top_k);
    for samples in stream {
        let samples = samples?;
        if samples.is_empty() {
            continue;
        }
        let batch: NutritionBatch<B> = batcher.batch(samples, device);
        let output = model.forward(batch.images);
        let loss = options
            .loss
            .forward(&output, batch.targets, batch.nutrition.clone())
            .values();

        let probabilities = tensor_to_vec(softmax(output.classification, 1))?;
        let nutrition_pred = tensor_to_vec(output.nutrition)?;
        let nutrition_true = tensor_to_vec(batch.nutrition)?;
        let labels = labels_to_vec(batch.class_indices)?;

        accumulator.record(&probabilities, &labels, &nutrition_pred, &nutrition_true, loss);
        inspect(&BatchOutputs {
            probabilities: &probabilities,
            labels: &labels,
            nutrition_pred: &nutrition_pred,
            nutrition_true: &nutrition_true,
        });
    }

    if stop.is_stopped() {
        return Err(Error::Interrupted);
    }
    if accumulator.samples() < split.len() {
        return Err(Error::Dataset(format!(
            "evaluation ended after {} of {} samples",
            accumulator.samples(),
            split.len()
        )));
    }
    debug!("Evaluated {} samples", accumulator.samples());
    Ok(accumulator.summary())
}

/// Scores of one class in the test report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassReport {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Test-set evaluation written to `evaluation_results.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub num_samples: usize,
    pub accuracy: f64,
    pub top_k: usize,
    pub top_k_accuracy: f64,
    pub loss: f64,
    pub classification_loss: f64,
    pub regression_loss: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub per_class: Vec<ClassReport>,
    pub confusion_matrix: Vec<Vec<usize>>,
    pub nutrition_mae: f64,
    pub nutrition_mse: f64,
    pub nutrition: Vec<NutrientScore>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationReport {
    fn build(
        class_names: &[String],
        summary: &EpochSummary,
        metrics: &EvaluationMetrics,
        nutrients: &NutrientErrors,
    ) -> Self {
        let per_class = class_names
            .iter()
            .enumerate()
            .map(|(i, name)| ClassReport {
                name: name.clone(),
                precision: metrics.per_class_precision[i],
                recall: metrics.per_class_recall[i],
                f1: metrics.per_class_f1[i],
                support: metrics.per_class_support[i],
            })
            .collect();

        Self {
            num_samples: metrics.num_samples,
            accuracy: metrics.accuracy,
            top_k: metrics.top_k,
            top_k_accuracy: metrics.top_k_accuracy,
            loss: summary.loss,
            classification_loss: summary.classification_loss,
            regression_loss: summary.regression_loss,
            macro_precision: metrics.macro_precision(),
            macro_recall: metrics.macro_recall(),
            macro_f1: metrics.macro_f1(),
            per_class,
            confusion_matrix: metrics.confusion_matrix.clone(),
            nutrition_mae: nutrients.mae(),
            nutrition_mse: nutrients.mse(),
            nutrition: nutrients.per_nutrient(),
            evaluated_at: Utc::now(),
        }
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Classes ordered by F1, worst first.
    pub fn weakest_classes(&self, n: usize) -> Vec<&ClassReport> {
        let mut classes: Vec<&ClassReport> = self.per_class.iter().collect();
        classes.sort_by(|a, b| a.f1.total_cmp(&b.f1));
        classes.truncate(n);
        classes
    }
}

/// Test-set evaluator for a trained model.
pub struct Evaluator<B: Backend> {
    model: NutritionNet<B>,
    class_names: Vec<String>,
    device: B::Device,
    options: EvalOptions,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(model: NutritionNet<B>, class_names: Vec<String>, device: B::Device) -> Self {
        Self {
            model,
            class_names,
            device,
            options: EvalOptions::default(),
        }
    }

    pub fn from_artifact(dir: &Path, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_artifact::<B>(dir, &device)?;
        info!(
            "Loaded model from {} ({} classes)",
            dir.display(),
            metadata.num_classes()
        );
        Ok(Self::new(model, metadata.class_names, device))
    }

    pub fn with_options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn evaluate(
        &self,
        pipeline: &Arc<SamplePipeline>,
        split: &Arc<IndexedSplit>,
        stop: &StopSignal,
    ) -> Result<EvaluationReport> {
        pipeline.catalog().ensure_same_classes(&self.class_names)?;
        if self.model.input_shape() != pipeline.input_shape() {
            return Err(Error::ImageSizeMismatch {
                model: self.model.input_shape(),
                pipeline: pipeline.input_shape(),
            });
        }

        let k = self.class_names.len();
        let mut metrics = EvaluationMetrics::new(k, self.options.top_k);
        let mut nutrients = NutrientErrors::new();

        let summary = evaluate_split(
            &self.model,
            pipeline,
            split,
            &self.options,
            &self.device,
            stop,
            |batch| {
                for (i, &label) in batch.labels.iter().enumerate() {
                    let row = &batch.probabilities[i * k..(i + 1) * k];
                    if let Some(predicted) = argmax(row) {
                        metrics.record(label, predicted, in_top_k(row, label, self.options.top_k));
                    }
                }
                let pairs = batch
                    .nutrition_pred
                    .chunks_exact(NUTRITION_DIMS)
                    .zip(batch.nutrition_true.chunks_exact(NUTRITION_DIMS));
                for (pred, actual) in pairs {
                    let pred: Option<&[f32; NUTRITION_DIMS]> = pred.try_into().ok();
                    let actual: Option<&[f32; NUTRITION_DIMS]> = actual.try_into().ok();
                    if let (Some(pred), Some(actual)) = (pred, actual) {
                        nutrients.record(pred, actual);
                    }
                }
            },
        )?;
        metrics.compute_from_confusion_matrix();

        let report = EvaluationReport::build(&self.class_names, &summary, &metrics, &nutrients);
        info!(
            "Test accuracy {:.2}%, top-{} {:.2}%, nutrition MAE {:.2}",
            report.accuracy * 100.0,
            report.top_k,
            report.top_k_accuracy * 100.0,
            report.nutrition_mae
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{save_artifact, ArtifactMetadata};
    use crate::test_support::{catalog, tiny_config, write_images, TestBackend};
    use nutrition_core::ImageDimensions;
    use nutrition_dataset::DatasetIndexer;
    use tempfile::tempdir;

    fn fixture(dir: &Path) -> (Arc<SamplePipeline>, Arc<IndexedSplit>) {
        let manifest = write_images(dir, 3, 32);
        let catalog = catalog();
        let split = DatasetIndexer::new(dir)
            .index_checked(&manifest, &catalog)
            .unwrap();
        let pipeline = SamplePipeline::new(
            catalog,
            ImageDimensions::square_rgb(32),
            PipelineMode::Evaluation,
        );
        (Arc::new(pipeline), Arc::new(split))
    }

    #[test]
    fn test_evaluate_split_visits_every_sample_in_order() {
        let dir = tempdir().unwrap();
        let (pipeline, split) = fixture(dir.path());
        let device = Default::default();
        let model: NutritionNet<TestBackend> = tiny_config(2, 32).init(&device);

        let options = EvalOptions {
            batch_size: 4,
            ..EvalOptions::default()
        };
        let mut seen = Vec::new();
        let summary = evaluate_split(
            &model,
            &pipeline,
            &split,
            &options,
            &device,
            &StopSignal::new(),
            |batch| seen.extend_from_slice(batch.labels),
        )
        .unwrap();

        assert_eq!(summary.samples, 6);
        assert_eq!(seen, vec![0, 0, 0, 1, 1, 1]);
        // Two classes always fit in the top five
        assert_eq!(summary.top_k_accuracy, 1.0);
        assert!(summary.loss.is_finite());
    }

    #[test]
    fn test_stopped_evaluation_is_interrupted() {
        let dir = tempdir().unwrap();
        let (pipeline, split) = fixture(dir.path());
        let device = Default::default();
        let model: NutritionNet<TestBackend> = tiny_config(2, 32).init(&device);

        let stop = StopSignal::new();
        stop.stop();
        let result = evaluate_split(
            &model,
            &pipeline,
            &split,
            &EvalOptions::default(),
            &device,
            &stop,
            |_| {},
        );
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[test]
    fn test_report_from_artifact() {
        let dir = tempdir().unwrap();
        let (pipeline, split) = fixture(dir.path());
        let device = Default::default();

        let config = tiny_config(2, 32);
        let model: NutritionNet<TestBackend> = config.init(&device);
        let artifact_dir = dir.path().join("best_model");
        let metadata = ArtifactMetadata::new(&config, pipeline.catalog().class_names().to_vec());
        save_artifact(&model, &metadata, &artifact_dir).unwrap();

        let evaluator = Evaluator::<TestBackend>::from_artifact(&artifact_dir, device).unwrap();
        let report = evaluator
            .evaluate(&pipeline, &split, &StopSignal::new())
            .unwrap();

        assert_eq!(report.num_samples, 6);
        assert_eq!(report.per_class.len(), 2);
        assert_eq!(report.per_class[0].name, "pizza");
        assert_eq!(report.per_class[1].support, 3);
        assert_eq!(report.nutrition.len(), 7);
        assert_eq!(report.nutrition[6].nutrient, "sodium");
        let total: usize = report.confusion_matrix.iter().flatten().sum();
        assert_eq!(total, 6);

        let path = dir.path().join("evaluation_results.json");
        report.save_json(&path).unwrap();
        let loaded = EvaluationReport::load_json(&path).unwrap();
        assert_eq!(loaded.per_class, report.per_class);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let (pipeline, split) = fixture(dir.path());
        let device = Default::default();
        let model: NutritionNet<TestBackend> = tiny_config(2, 64).init(&device);

        let evaluator = Evaluator::new(model, vec!["pizza".into(), "sushi".into()], device);
        let result = evaluator.evaluate(&pipeline, &split, &StopSignal::new());
        assert!(matches!(
            result,
            Err(Error::ImageSizeMismatch {
                model: [64, 64, 3],
                pipeline: [32, 32, 3]
            })
        ));
    }
}
