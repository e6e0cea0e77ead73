//! Evaluation CLI
//!
//! Runs a trained model over the test manifest and writes
//! `evaluation_results.json`: accuracy, top-k accuracy, per-class
//! precision/recall/F1, confusion matrix and per-nutrient MAE/MAPE.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use nutrition_core::{
    default_device, load_toml_config, setup_cli_logging, DefaultBackend, NutritionCatalog,
    TrainingConfig,
};
use nutrition_dataset::{
    DatasetIndexer, DatasetStatistics, PipelineMode, SamplePipeline, SplitManifest, StopSignal,
};
use nutrition_training::{DualLossFn, EvalOptions, EvaluationReport, Evaluator};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "nutrition-evaluate",
    about = "Evaluate a trained nutrition model on the test split",
    version
)]
struct Args {
    /// Model artifact directory
    #[arg(short, long, value_name = "DIR", default_value = "output/models/best_model")]
    model: PathBuf,

    /// Training configuration file (TOML) providing data paths
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the images directory
    #[arg(long, value_name = "DIR")]
    images_dir: Option<PathBuf>,

    /// Override the test manifest
    #[arg(long, value_name = "FILE")]
    test_manifest: Option<PathBuf>,

    /// Override the nutrition catalog
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Report path (defaults to evaluation_results.json next to the model)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Number of weakest classes to print
    #[arg(long, default_value_t = 5)]
    show_worst: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config: TrainingConfig = match &args.config {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(dir) = &args.images_dir {
        config.data.images_dir = dir.clone();
    }
    if let Some(path) = &args.test_manifest {
        config.data.test_manifest = path.clone();
    }
    if let Some(path) = &args.catalog {
        config.data.catalog_path = path.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }

    let catalog = Arc::new(
        NutritionCatalog::from_json_file(&config.data.catalog_path).with_context(|| {
            format!("Failed to load catalog {}", config.data.catalog_path.display())
        })?,
    );

    let manifest = SplitManifest::load(&config.data.test_manifest)?;
    let split = DatasetIndexer::new(&config.data.images_dir)
        .index_checked(&manifest, &catalog)
        .context("Test manifest does not match the catalog")?;
    DatasetStatistics::from_split(&split).log_summary("Test split");

    let options = EvalOptions {
        batch_size: config.training.batch_size,
        prefetch: config.data.prefetch_batches,
        top_k: config.training.top_k,
        loss: DualLossFn::new(config.training.loss_weights),
    };
    let evaluator = Evaluator::<DefaultBackend>::from_artifact(&args.model, default_device())
        .with_context(|| format!("Failed to load model {}", args.model.display()))?
        .with_options(options);

    let pipeline = SamplePipeline::new(catalog, config.data.image_size, PipelineMode::Evaluation);
    info!("Evaluating {} images", split.len());
    let report = evaluator
        .evaluate(&Arc::new(pipeline), &Arc::new(split), &StopSignal::new())
        .context("Evaluation failed")?;

    print_report(&report, args.show_worst);

    let output = args.output.unwrap_or_else(|| {
        args.model
            .parent()
            .map(|dir| dir.join("evaluation_results.json"))
            .unwrap_or_else(|| PathBuf::from("evaluation_results.json"))
    });
    report
        .save_json(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("  Report saved to {}", output.display());

    Ok(())
}

fn print_report(report: &EvaluationReport, show_worst: usize) {
    println!();
    println!("{}", "Classification".cyan().bold());
    println!("  Samples:          {}", report.num_samples);
    println!("  Accuracy:         {:.2}%", report.accuracy * 100.0);
    println!(
        "  Top-{} accuracy:   {:.2}%",
        report.top_k,
        report.top_k_accuracy * 100.0
    );
    println!("  Macro precision:  {:.4}", report.macro_precision);
    println!("  Macro recall:     {:.4}", report.macro_recall);
    println!("  Macro F1:         {:.4}", report.macro_f1);
    println!(
        "  Loss:             {:.4} (cls {:.4}, reg {:.4})",
        report.loss, report.classification_loss, report.regression_loss
    );

    if show_worst > 0 {
        println!();
        println!("{}", "Weakest classes".cyan().bold());
        for class in report.weakest_classes(show_worst) {
            println!(
                "  {:<28} F1 {:.3}  P {:.3}  R {:.3}  n={}",
                class.name, class.f1, class.precision, class.recall, class.support
            );
        }
    }

    println!();
    println!("{}", "Nutrition".cyan().bold());
    println!("  MAE {:.2}, MSE {:.2}", report.nutrition_mae, report.nutrition_mse);
    for score in &report.nutrition {
        let mape = format!("{:.1}%", score.mape);
        let mape = if score.mape > 50.0 {
            mape.red()
        } else {
            mape.normal()
        };
        println!("  {:<10} MAE {:>9.2}  MAPE {}", score.nutrient, score.mae, mape);
    }
    println!();
}
