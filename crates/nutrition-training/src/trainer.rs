//! Training loop for the dual-head network.
//!
//! Each epoch streams the training split (shuffled, augmented), steps Adam
//! on the combined loss, then validates on the held-out split. Epoch-end
//! control:
//! - best model by validation accuracy is written to `best_model/`
//! - learning rate halves after a validation-loss plateau
//! - early stopping on validation loss restores the best-loss weights
//!
//! A raised [`StopSignal`] ends the run between batches; the weights
//! reached so far are still written to `final_model/`.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use nutrition_core::{
    EpochRecord, Error, NutritionCatalog, Result, TrainingConfig, TrainingHistory,
};
use nutrition_dataset::{
    DatasetIndexer, IndexedSplit, NutritionBatch, NutritionBatcher, SamplePipeline,
    SampleStream, SplitManifest, StopSignal, StreamConfig,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactMetadata;
use crate::callbacks::EpochControl;
use crate::checkpoint::CheckpointManager;
use crate::epoch::{EpochAccumulator, EpochSummary};
use crate::evaluator::{evaluate_split, EvalOptions};
use crate::history::{save_history, TrainingLog};
use crate::loss::DualLossFn;
use crate::model::{NutritionNet, NutritionNetConfig};

pub const CONFIG_FILE: &str = "training_config.json";
pub const HISTORY_FILE: &str = "training_history.json";

/// Progress hooks for front ends; every method defaults to a no-op.
pub trait TrainingObserver {
    fn on_epoch_start(&mut self, _epoch: usize, _num_epochs: usize, _num_batches: usize) {}
    fn on_batch(&mut self, _batch: usize, _loss: f64) {}
    fn on_epoch_end(&mut self, _record: &EpochRecord, _is_best: bool) {}
}

pub struct SilentObserver;

impl TrainingObserver for SilentObserver {}

/// Pipeline and splits of one run
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub pipeline: Arc<SamplePipeline>,
    pub train: Arc<IndexedSplit>,
    pub validation: Arc<IndexedSplit>,
}

impl TrainingData {
    pub fn new(pipeline: SamplePipeline, train: IndexedSplit, validation: IndexedSplit) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            train: Arc::new(train),
            validation: Arc::new(validation),
        }
    }

    /// Indexes the training manifest against the catalog and holds out the
    /// validation fraction.
    pub fn prepare(config: &TrainingConfig, catalog: Arc<NutritionCatalog>) -> Result<Self> {
        let manifest = SplitManifest::load(&config.data.train_manifest)?;
        let mut split = DatasetIndexer::new(&config.data.images_dir)
            .index_checked(&manifest, &catalog)?;

        if let Some(max) = config.data.max_samples {
            split = subsample(&split, max, config.seed);
            info!("Limited training data to {} samples", split.len());
        }

        let (train, validation) =
            split.split_validation(config.data.validation_fraction, config.seed);
        info!(
            "Split: {} training, {} validation samples",
            train.len(),
            validation.len()
        );

        let augmentation = config
            .data
            .augmentation
            .then(|| config.data.augmentation_params.clone());
        let pipeline = SamplePipeline::training(catalog, config.data.image_size, augmentation);
        Ok(Self::new(pipeline, train, validation))
    }
}

/// Random subset of at most `max` entries, in manifest order.
fn subsample(split: &IndexedSplit, max: usize, seed: u64) -> IndexedSplit {
    if max >= split.len() {
        return split.clone();
    }
    let dropped = 1.0 - max as f64 / split.len() as f64;
    let (kept, _) = split.split_validation(dropped, seed);
    kept
}

/// Result of [`Trainer::fit`]
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub history: TrainingHistory,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_val_accuracy: Option<f64>,
    pub best_val_loss: Option<f64>,
    pub best_loss_epoch: Option<usize>,
    pub stopped_early: bool,
    pub interrupted: bool,
    pub best_model_dir: PathBuf,
    pub final_model_dir: PathBuf,
}

enum EpochEnd {
    Completed(EpochSummary),
    /// Stopped after `batches` optimizer steps of the epoch
    Interrupted { batches: usize },
}

pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    stop: StopSignal,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self {
            config,
            device,
            stop: StopSignal::new(),
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Network configuration matching the data of this run.
    pub fn model_config(&self, data: &TrainingData) -> NutritionNetConfig {
        NutritionNetConfig::from_model_config(
            data.pipeline.num_classes(),
            data.pipeline.image_size(),
            &self.config.model,
        )
    }

    pub fn fit<O: TrainingObserver>(
        &self,
        model_config: &NutritionNetConfig,
        data: &TrainingData,
        observer: &mut O,
    ) -> Result<TrainingOutcome> {
        self.config.validate()?;

        let pipeline_shape = data.pipeline.input_shape();
        if model_config.input_shape() != pipeline_shape {
            return Err(Error::ImageSizeMismatch {
                model: model_config.input_shape(),
                pipeline: pipeline_shape,
            });
        }
        let catalog = data.pipeline.catalog();
        if model_config.num_classes != catalog.len() {
            return Err(Error::ShapeMismatch {
                what: "classification output".to_string(),
                expected: vec![catalog.len()],
                actual: vec![model_config.num_classes],
            });
        }
        if data.train.is_empty() {
            return Err(Error::Dataset("training split is empty".to_string()));
        }
        if data.validation.is_empty() {
            warn!("Validation split is empty, epoch-end control uses training metrics");
        }

        let output = &self.config.output;
        fs::create_dir_all(&output.output_dir)?;
        fs::write(
            output.output_dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&self.config)?,
        )?;

        let checkpoints = CheckpointManager::new(&output.output_dir);
        let mut log = TrainingLog::create(output.training_log())?;
        let metadata = ArtifactMetadata::new(model_config, catalog.class_names().to_vec());

        let params = &self.config.training;
        let loss_fn = DualLossFn::new(params.loss_weights);
        let eval_options = EvalOptions {
            batch_size: params.batch_size,
            prefetch: self.config.data.prefetch_batches,
            top_k: params.top_k,
            loss: loss_fn,
        };
        let eval_pipeline = Arc::new(data.pipeline.evaluation());

        let mut model: NutritionNet<B> = model_config.init(&self.device);
        let mut optimizer = AdamConfig::new().init();
        let mut control = EpochControl::new(params);

        let mut history = TrainingHistory::new();
        let mut weights_epoch = None;
        let mut stopped_early = false;
        let mut interrupted = false;

        info!(
            "Training for {} epochs: {} train / {} validation samples, batch size {}, lr {}",
            params.num_epochs,
            data.train.len(),
            data.validation.len(),
            params.batch_size,
            params.learning_rate
        );

        for epoch in 1..=params.num_epochs {
            let lr = control.lr();
            let (trained, end) =
                self.train_epoch(model, &mut optimizer, &loss_fn, data, epoch, lr, observer)?;
            model = trained;

            let train = match end {
                EpochEnd::Completed(summary) => summary,
                EpochEnd::Interrupted { batches } => {
                    if batches > 0 {
                        warn!("Epoch {epoch} interrupted after {batches} batches, final weights are mid-epoch");
                        weights_epoch = None;
                    }
                    interrupted = true;
                    break;
                }
            };

            let val = if data.validation.is_empty() {
                train
            } else {
                let valid_model = model.valid();
                let device = valid_model.devices().into_iter().next().unwrap_or_default();
                match evaluate_split(
                    &valid_model,
                    &eval_pipeline,
                    &data.validation,
                    &eval_options,
                    &device,
                    &self.stop,
                    |_| {},
                ) {
                    Ok(summary) => summary,
                    Err(Error::Interrupted) => {
                        weights_epoch = Some(epoch);
                        interrupted = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            };
            weights_epoch = Some(epoch);

            let record = epoch_record(epoch, lr, &train, &val);
            log.append(&record)?;
            history.push(record.clone());

            let decision = control.end_epoch(epoch, &val, &model);
            let is_best = decision.is_best;
            let checkpoint = control.checkpoint(epoch, lr, &val);
            if is_best {
                checkpoints.save_best(&model, &metadata, &checkpoint)?;
            }
            checkpoints.save_latest(&checkpoint)?;

            info!(
                "Epoch {}/{}: loss {:.4} | acc {:.2}% | val loss {:.4} | val acc {:.2}% | val top-{} {:.2}% | val MAE {:.2}{}",
                epoch,
                params.num_epochs,
                train.loss,
                train.accuracy * 100.0,
                val.loss,
                val.accuracy * 100.0,
                params.top_k,
                val.top_k_accuracy * 100.0,
                val.mae,
                if is_best { " (best)" } else { "" }
            );
            observer.on_epoch_end(&record, is_best);

            if decision.should_stop {
                if let Some((best_epoch, best)) = control.take_best_loss_weights() {
                    info!("Early stopping at epoch {epoch}, restoring weights of epoch {best_epoch}");
                    model = best;
                    weights_epoch = Some(best_epoch);
                }
                stopped_early = true;
                break;
            }
        }

        if interrupted {
            warn!("Training interrupted after {} epochs", history.len());
        }

        let final_metadata = match weights_epoch {
            Some(epoch) => metadata.with_epoch(epoch),
            None => metadata,
        };
        checkpoints.save_final(&model, &final_metadata)?;
        save_history(&history, &output.output_dir.join(HISTORY_FILE))?;

        Ok(TrainingOutcome {
            epochs_run: history.len(),
            best_epoch: control.best_accuracy().best_epoch(),
            best_val_accuracy: control.best_accuracy().best(),
            best_val_loss: control.early_stopping().best_loss(),
            best_loss_epoch: control.early_stopping().best_epoch(),
            history,
            stopped_early,
            interrupted,
            best_model_dir: checkpoints.best_model_dir(),
            final_model_dir: checkpoints.final_model_dir(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn train_epoch<Opt, Obs>(
        &self,
        mut model: NutritionNet<B>,
        optimizer: &mut Opt,
        loss_fn: &DualLossFn,
        data: &TrainingData,
        epoch: usize,
        lr: f64,
        observer: &mut Obs,
    ) -> Result<(NutritionNet<B>, EpochEnd)>
    where
        Opt: Optimizer<NutritionNet<B>, B>,
        Obs: TrainingObserver,
    {
        let params = &self.config.training;
        let stream_config = StreamConfig::training(
            params.batch_size,
            self.config.data.shuffle_buffer,
            self.config.data.prefetch_batches,
            self.config.seed,
        )
        .with_epoch(epoch);
        let stream = SampleStream::spawn(
            Arc::clone(&data.pipeline),
            Arc::clone(&data.train),
            stream_config,
            self.stop.clone(),
        );
        let num_batches = stream.num_batches();
        observer.on_epoch_start(epoch, params.num_epochs, num_batches);

        let batcher = NutritionBatcher::new(data.pipeline.num_classes(), data.pipeline.dims());
        let mut accumulator = EpochAccumulator::new(params.top_k);

        let mut consumed = 0;
        for (batch_idx, samples) in stream.enumerate() {
            if self.stop.is_stopped() {
                break;
            }
            let samples = samples?;
            consumed += 1;
            if samples.is_empty() {
                continue;
            }
            let batch: NutritionBatch<B> = batcher.batch(samples, &self.device);

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(&output, batch.targets, batch.nutrition.clone());
            let values = loss.values();
            accumulator.record_output(output, batch.class_indices, batch.nutrition, values)?;

            let grads = loss.total.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(lr, model, grads);

            observer.on_batch(batch_idx + 1, values.total);
            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "Batch {:>4}/{}: loss = {:.4} (cls {:.4}, reg {:.4})",
                    batch_idx + 1,
                    num_batches,
                    values.total,
                    values.classification,
                    values.regression
                );
            }
        }

        if consumed < num_batches {
            return Ok((model, EpochEnd::Interrupted { batches: consumed }));
        }
        Ok((model, EpochEnd::Completed(accumulator.summary())))
    }
}

fn epoch_record(epoch: usize, lr: f64, train: &EpochSummary, val: &EpochSummary) -> EpochRecord {
    EpochRecord {
        epoch,
        learning_rate: lr,
        train_loss: train.loss,
        train_classification_loss: train.classification_loss,
        train_regression_loss: train.regression_loss,
        train_accuracy: train.accuracy,
        train_top_k_accuracy: train.top_k_accuracy,
        train_mae: train.mae,
        train_mse: train.mse,
        val_loss: val.loss,
        val_classification_loss: val.classification_loss,
        val_regression_loss: val.regression_loss,
        val_accuracy: val.accuracy,
        val_top_k_accuracy: val.top_k_accuracy,
        val_mae: val.mae,
        val_mse: val.mse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{load_artifact, METADATA_FILE, MODEL_FILE};
    use crate::epoch::tensor_to_vec;
    use crate::history::read_training_log;
    use burn::tensor::Tensor;
    use crate::test_support::{catalog, write_images, TestAutodiffBackend, TestBackend};
    use nutrition_core::{ImageDimensions, ModelConfig};
    use tempfile::{tempdir, TempDir};

    fn small_config(output_dir: &std::path::Path) -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.data.image_size = ImageDimensions::square_rgb(32);
        config.data.prefetch_batches = 2;
        config.model = ModelConfig {
            base_filters: 2,
            head_units: 8,
            ..ModelConfig::default()
        };
        config.training.num_epochs = 2;
        config.training.batch_size = 4;
        config.output.output_dir = output_dir.to_path_buf();
        config
    }

    fn small_data(dir: &TempDir, config: &TrainingConfig) -> TrainingData {
        let manifest = write_images(dir.path(), 5, 32);
        let split = DatasetIndexer::new(dir.path())
            .index_checked(&manifest, &catalog())
            .unwrap();
        let (train, validation) = split.split_validation(0.2, config.seed);
        let pipeline = SamplePipeline::training(
            catalog(),
            config.data.image_size,
            Some(config.data.augmentation_params.clone()),
        );
        TrainingData::new(pipeline, train, validation)
    }

    #[derive(Default)]
    struct Recorder {
        epochs_started: Vec<usize>,
        batches: usize,
        ended: Vec<(usize, bool)>,
    }

    impl TrainingObserver for Recorder {
        fn on_epoch_start(&mut self, epoch: usize, _num_epochs: usize, _num_batches: usize) {
            self.epochs_started.push(epoch);
        }

        fn on_batch(&mut self, _batch: usize, loss: f64) {
            assert!(loss.is_finite());
            self.batches += 1;
        }

        fn on_epoch_end(&mut self, record: &EpochRecord, is_best: bool) {
            self.ended.push((record.epoch, is_best));
        }
    }

    #[test]
    fn test_fit_writes_run_outputs() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let config = small_config(&out);
        let data = small_data(&dir, &config);
        assert_eq!(data.train.len(), 8);
        assert_eq!(data.validation.len(), 2);

        let trainer = Trainer::<TestAutodiffBackend>::new(config, Default::default());
        let model_config = trainer.model_config(&data);
        let mut recorder = Recorder::default();
        let outcome = trainer.fit(&model_config, &data, &mut recorder).unwrap();

        assert_eq!(outcome.epochs_run, 2);
        assert!(!outcome.interrupted);
        assert_eq!(recorder.epochs_started, vec![1, 2]);
        // Eight training samples in batches of four
        assert_eq!(recorder.batches, 4);
        assert_eq!(recorder.ended[0], (1, true));

        assert!(out.join(CONFIG_FILE).is_file());
        assert!(out.join(HISTORY_FILE).is_file());
        assert!(out.join("latest.json").is_file());
        assert!(outcome.best_model_dir.join(MODEL_FILE).is_file());
        assert!(outcome.final_model_dir.join(METADATA_FILE).is_file());

        let rows = read_training_log(&out.join("training_log.csv")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].learning_rate, 0.001);
        assert!(rows.iter().all(|r| (0.0..=1.0).contains(&r.val_accuracy)));

        let (_, metadata) =
            load_artifact::<TestBackend>(&outcome.final_model_dir, &Default::default()).unwrap();
        assert_eq!(metadata.class_names, vec!["pizza", "sushi"]);
        assert_eq!(metadata.epoch, Some(2));
    }

    #[test]
    fn test_stop_signal_interrupts_run() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let config = small_config(&out);
        let data = small_data(&dir, &config);

        let stop = StopSignal::new();
        stop.stop();
        let trainer =
            Trainer::<TestAutodiffBackend>::new(config, Default::default()).with_stop_signal(stop);
        let model_config = trainer.model_config(&data);
        let outcome = trainer.fit(&model_config, &data, &mut SilentObserver).unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.epochs_run, 0);
        assert!(outcome.final_model_dir.join(MODEL_FILE).is_file());
        assert!(!outcome.best_model_dir.exists());
    }

    #[test]
    fn test_image_size_mismatch_is_fatal() {
        let dir = tempdir().unwrap();
        let config = small_config(&dir.path().join("run"));
        let data = small_data(&dir, &config);

        let trainer = Trainer::<TestAutodiffBackend>::new(config, Default::default());
        let model_config = trainer.model_config(&data).with_input_size(224);
        let err = trainer
            .fit(&model_config, &data, &mut SilentObserver)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ImageSizeMismatch {
                model: [224, 224, 3],
                pipeline: [32, 32, 3]
            }
        ));
        assert!(err.is_fatal_precondition());
    }

    #[test]
    fn test_non_square_pipeline_is_rejected() {
        let dir = tempdir().unwrap();
        let config = small_config(&dir.path().join("run"));
        let square = small_data(&dir, &config);
        let pipeline = SamplePipeline::training(catalog(), ImageDimensions::new(32, 16, 3), None);
        let data = TrainingData::new(
            pipeline,
            (*square.train).clone(),
            (*square.validation).clone(),
        );

        let trainer = Trainer::<TestAutodiffBackend>::new(config, Default::default());
        let model_config = trainer.model_config(&data);
        let err = trainer
            .fit(&model_config, &data, &mut SilentObserver)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ImageSizeMismatch {
                model: [32, 32, 3],
                pipeline: [16, 32, 3]
            }
        ));
        assert!(!dir.path().join("run").join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_prepare_from_config() {
        let dir = tempdir().unwrap();
        let manifest = write_images(dir.path(), 5, 16);
        let manifest_path = dir.path().join("train.json");
        fs::write(&manifest_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        let mut config = small_config(&dir.path().join("run"));
        config.data.images_dir = dir.path().to_path_buf();
        config.data.train_manifest = manifest_path;
        config.data.max_samples = Some(6);

        let data = TrainingData::prepare(&config, catalog()).unwrap();
        assert_eq!(data.train.len() + data.validation.len(), 6);
        assert_eq!(data.validation.len(), 1);
        assert_eq!(data.pipeline.image_size(), 32);
    }

    #[test]
    fn test_prepare_missing_manifest() {
        let dir = tempdir().unwrap();
        let mut config = small_config(&dir.path().join("run"));
        config.data.train_manifest = dir.path().join("absent.json");
        assert!(matches!(
            TrainingData::prepare(&config, catalog()),
            Err(Error::ManifestNotFound(_))
        ));
    }

    fn artifact_outputs(dir: &std::path::Path) -> Vec<f32> {
        let device = Default::default();
        let (model, _) = load_artifact::<TestBackend>(dir, &device).unwrap();
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        tensor_to_vec(model.infer(images).nutrition).unwrap()
    }

    /// Captures the `best_model/` artifact as written after epoch 1.
    struct FirstEpochCapture {
        best_model_dir: PathBuf,
        outputs: Option<Vec<f32>>,
    }

    impl TrainingObserver for FirstEpochCapture {
        fn on_epoch_end(&mut self, record: &EpochRecord, is_best: bool) {
            if record.epoch == 1 {
                assert!(is_best);
                self.outputs = Some(artifact_outputs(&self.best_model_dir));
            }
        }
    }

    /// Raises the stop signal after a given batch of a given epoch.
    struct StopAfter {
        stop: StopSignal,
        epoch: usize,
        batch: usize,
        current_epoch: usize,
        batches: usize,
    }

    impl TrainingObserver for StopAfter {
        fn on_epoch_start(&mut self, epoch: usize, _num_epochs: usize, _num_batches: usize) {
            self.current_epoch = epoch;
        }

        fn on_batch(&mut self, batch: usize, _loss: f64) {
            self.batches += 1;
            if self.current_epoch == self.epoch && batch == self.batch {
                self.stop.stop();
            }
        }
    }

    #[test]
    fn test_early_stopping_restores_best_loss_weights() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let mut config = small_config(&out);
        config.training.num_epochs = 5;
        config.training.early_stopping_patience = 1;
        // No later epoch can beat the first loss by this margin
        config.training.early_stopping_min_delta = 1e9;
        let data = small_data(&dir, &config);

        let trainer = Trainer::<TestAutodiffBackend>::new(config, Default::default());
        let model_config = trainer.model_config(&data);
        let mut capture = FirstEpochCapture {
            best_model_dir: out.join("best_model"),
            outputs: None,
        };
        let outcome = trainer.fit(&model_config, &data, &mut capture).unwrap();

        assert!(outcome.stopped_early);
        assert!(!outcome.interrupted);
        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.best_loss_epoch, Some(1));
        assert_eq!(outcome.best_val_loss, Some(outcome.history.epochs[0].val_loss));

        let (_, metadata) =
            load_artifact::<TestBackend>(&outcome.final_model_dir, &Default::default()).unwrap();
        assert_eq!(metadata.epoch, Some(1));

        let epoch_one = capture.outputs.unwrap();
        let restored = artifact_outputs(&outcome.final_model_dir);
        assert_eq!(restored.len(), epoch_one.len());
        for (a, b) in restored.iter().zip(&epoch_one) {
            assert!((a - b).abs() < 1e-6, "{a} != {b}");
        }

        let best = CheckpointManager::new(&out).load_best().unwrap();
        assert_eq!(Some(best.epoch), outcome.best_epoch);
        assert_eq!(Some(best.val_accuracy), outcome.best_val_accuracy);
        let (_, best_metadata) =
            load_artifact::<TestBackend>(&outcome.best_model_dir, &Default::default()).unwrap();
        assert_eq!(best_metadata.epoch, outcome.best_epoch);
    }

    #[test]
    fn test_stop_after_last_batch_keeps_epoch_label() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let config = small_config(&out);
        let data = small_data(&dir, &config);

        let stop = StopSignal::new();
        let trainer = Trainer::<TestAutodiffBackend>::new(config, Default::default())
            .with_stop_signal(stop.clone());
        let model_config = trainer.model_config(&data);
        let mut observer = StopAfter {
            stop,
            epoch: 1,
            batch: 2,
            current_epoch: 0,
            batches: 0,
        };
        let outcome = trainer.fit(&model_config, &data, &mut observer).unwrap();

        assert!(outcome.interrupted);
        assert_eq!(observer.batches, 2);
        // Validation of epoch 1 was cut short, so nothing was logged
        assert_eq!(outcome.epochs_run, 0);
        let (_, metadata) =
            load_artifact::<TestBackend>(&outcome.final_model_dir, &Default::default()).unwrap();
        assert_eq!(metadata.epoch, Some(1));
    }

    #[test]
    fn test_stop_mid_epoch_clears_epoch_label() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let config = small_config(&out);
        let data = small_data(&dir, &config);

        let stop = StopSignal::new();
        let trainer = Trainer::<TestAutodiffBackend>::new(config, Default::default())
            .with_stop_signal(stop.clone());
        let model_config = trainer.model_config(&data);
        let mut observer = StopAfter {
            stop,
            epoch: 2,
            batch: 1,
            current_epoch: 0,
            batches: 0,
        };
        let outcome = trainer.fit(&model_config, &data, &mut observer).unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.epochs_run, 1);
        // Two batches of epoch 1, one of epoch 2
        assert_eq!(observer.batches, 3);
        let (_, metadata) =
            load_artifact::<TestBackend>(&outcome.final_model_dir, &Default::default()).unwrap();
        assert_eq!(metadata.epoch, None);
    }
}
