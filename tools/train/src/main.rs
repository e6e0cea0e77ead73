//! Training CLI
//!
//! Reads a TOML training configuration, indexes the training manifest
//! against the nutrition catalog and trains the dual-head model. Ctrl-C
//! stops the run after the current batch and still writes the final model.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use nutrition_core::{
    backend_name, default_device, load_toml_config, setup_cli_logging, EpochRecord,
    NutritionCatalog, TrainingBackend, TrainingConfig,
};
use nutrition_dataset::{DatasetStatistics, StopSignal};
use nutrition_training::{Trainer, TrainingData, TrainingObserver, TrainingOutcome};
use tracing::{info, warn};

/// Food recognition and nutrition estimation training tool
#[derive(Parser, Debug)]
#[command(
    name = "nutrition-train",
    about = "Train the food classification and nutrition regression model",
    version
)]
struct Args {
    /// Training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the images directory
    #[arg(long, value_name = "DIR")]
    images_dir: Option<PathBuf>,

    /// Override the training manifest
    #[arg(long, value_name = "FILE")]
    train_manifest: Option<PathBuf>,

    /// Override the nutrition catalog
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Override the output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Use at most this many indexed images
    #[arg(long, value_name = "N")]
    max_samples: Option<usize>,

    /// Disable training augmentation
    #[arg(long)]
    no_augmentation: bool,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Validate the configuration and exit
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config: TrainingConfig = match &args.config {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid training configuration")?;

    print_config_summary(&config);
    if args.dry_run {
        info!("Configuration validated (dry run)");
        return Ok(());
    }

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current batch");
                stop.stop();
            }
        });
    }

    let outcome = tokio::task::spawn_blocking(move || run_training(config, stop))
        .await
        .context("Training task panicked")??;

    print_outcome(&outcome);
    Ok(())
}

fn apply_overrides(config: &mut TrainingConfig, args: &Args) {
    if let Some(dir) = &args.images_dir {
        config.data.images_dir = dir.clone();
    }
    if let Some(path) = &args.train_manifest {
        config.data.train_manifest = path.clone();
    }
    if let Some(path) = &args.catalog {
        config.data.catalog_path = path.clone();
    }
    if let Some(dir) = &args.output {
        config.output.output_dir = dir.clone();
    }
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        config.training.learning_rate = lr;
    }
    if args.max_samples.is_some() {
        config.data.max_samples = args.max_samples;
    }
    if args.no_augmentation {
        config.data.augmentation = false;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
}

fn print_config_summary(config: &TrainingConfig) {
    println!();
    println!("{}", "Training Configuration".cyan().bold());
    println!("  Backend:        {}", backend_name());
    println!("  Images:         {}", config.data.images_dir.display());
    println!("  Manifest:       {}", config.data.train_manifest.display());
    println!("  Catalog:        {}", config.data.catalog_path.display());
    println!(
        "  Image size:     {}x{}",
        config.data.image_size.width, config.data.image_size.height
    );
    println!("  Augmentation:   {}", config.data.augmentation);
    println!("  Epochs:         {}", config.training.num_epochs);
    println!("  Batch size:     {}", config.training.batch_size);
    println!("  Learning rate:  {}", config.training.learning_rate);
    println!(
        "  Loss weights:   {} cls / {} reg",
        config.training.loss_weights.classification, config.training.loss_weights.regression
    );
    println!("  Output:         {}", config.output.output_dir.display());
    println!();
}

fn run_training(config: TrainingConfig, stop: StopSignal) -> Result<TrainingOutcome> {
    let catalog = NutritionCatalog::from_json_file(&config.data.catalog_path)
        .with_context(|| format!("Failed to load catalog {}", config.data.catalog_path.display()))?;
    info!("Catalog: {} classes", catalog.len());

    let data = TrainingData::prepare(&config, Arc::new(catalog))
        .context("Failed to prepare training data")?;
    DatasetStatistics::from_split(&data.train).log_summary("Training split");
    DatasetStatistics::from_split(&data.validation).log_summary("Validation split");

    let trainer = Trainer::<TrainingBackend>::new(config, default_device()).with_stop_signal(stop);
    let model_config = trainer.model_config(&data);
    let mut progress = ProgressObserver::new()?;

    trainer
        .fit(&model_config, &data, &mut progress)
        .context("Training failed")
}

/// Batch progress bar plus a colored line per epoch.
struct ProgressObserver {
    style: ProgressStyle,
    bar: Option<ProgressBar>,
}

impl ProgressObserver {
    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-");
        Ok(Self { style, bar: None })
    }
}

impl TrainingObserver for ProgressObserver {
    fn on_epoch_start(&mut self, epoch: usize, num_epochs: usize, num_batches: usize) {
        let bar = ProgressBar::new(num_batches as u64);
        bar.set_style(self.style.clone());
        bar.set_prefix(format!("Epoch {epoch}/{num_epochs}"));
        self.bar = Some(bar);
    }

    fn on_batch(&mut self, _batch: usize, loss: f64) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("loss {loss:.4}"));
            bar.inc(1);
        }
    }

    fn on_epoch_end(&mut self, record: &EpochRecord, is_best: bool) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        println!(
            "  {} epoch {:>3} | loss {:.4} | acc {:.2}% | val loss {:.4} | val acc {:.2}% | val MAE {:.2} | lr {:.1e}{}",
            "→".cyan(),
            record.epoch,
            record.train_loss,
            record.train_accuracy * 100.0,
            record.val_loss,
            record.val_accuracy * 100.0,
            record.val_mae,
            record.learning_rate,
            if is_best {
                " (best)".green().to_string()
            } else {
                String::new()
            }
        );
    }
}

fn print_outcome(outcome: &TrainingOutcome) {
    println!();
    if outcome.interrupted {
        println!("{}", "Training interrupted".yellow().bold());
    } else if outcome.stopped_early {
        println!("{}", "Training stopped early".yellow().bold());
    } else {
        println!("{}", "Training complete".green().bold());
    }
    println!("  Epochs run:               {}", outcome.epochs_run);
    if let (Some(epoch), Some(accuracy)) = (outcome.best_epoch, outcome.best_val_accuracy) {
        println!(
            "  Best validation accuracy: {:.2}% (epoch {epoch})",
            accuracy * 100.0
        );
        println!("  Best model:               {}", outcome.best_model_dir.display());
    }
    if let (Some(loss), Some(epoch)) = (outcome.best_val_loss, outcome.best_loss_epoch) {
        println!("  Best validation loss:     {loss:.4} (epoch {epoch})");
    }
    println!("  Final model:              {}", outcome.final_model_dir.display());
    println!();
    println!("{}", "Next steps:".cyan().bold());
    println!(
        "  • Evaluate: nutrition-evaluate --model {}",
        outcome.best_model_dir.display()
    );
    println!(
        "  • Predict:  nutrition-infer --model {} --image <photo.jpg>",
        outcome.best_model_dir.display()
    );
}
