//! Single-image inference CLI
//!
//! Loads the model artifact and catalog the way the inference service does,
//! prints a readable report for one image and optionally saves the JSON
//! result.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use nutrition_core::{default_device, setup_cli_logging, DefaultBackend, ImageDimensions, ServiceConfig};
use nutrition_dataset::ImageInput;
use nutrition_inference::{
    InferenceService, LifecycleState, ModelStatus, PredictionResponse, PredictionResult,
};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "nutrition-infer",
    about = "Recognize a dish and estimate its nutrition values",
    version
)]
struct Args {
    /// Image to analyse
    #[arg(short, long, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Model artifact directory (default: $NUTRITION_MODEL_DIR or models/best_model)
    #[arg(short, long, value_name = "DIR")]
    model: Option<PathBuf>,

    /// Nutrition catalog (default: $NUTRITION_CATALOG or data/nutrition_database.json)
    #[arg(short, long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Model input resolution
    #[arg(long, default_value_t = 224)]
    image_size: u32,

    /// Also estimate the portion size
    #[arg(long)]
    portion: bool,

    /// Write the JSON result to this file
    #[arg(short, long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Print the model status and exit
    #[arg(long)]
    status: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config = ServiceConfig::default().with_env_overrides();
    if let Some(dir) = &args.model {
        config.model_dir = dir.clone();
    }
    if let Some(path) = &args.catalog {
        config.catalog_path = path.clone();
    }
    config.image_size = ImageDimensions::square_rgb(args.image_size);

    let service = InferenceService::<DefaultBackend>::start(&config, default_device())
        .context("Failed to start inference service")?;

    if args.status {
        print_status(&service.model_status());
        return Ok(());
    }

    let Some(image_path) = &args.image else {
        bail!("--image is required unless --status is given");
    };
    info!("Analysing {}", image_path.display());
    let bytes = fs::read(image_path)
        .with_context(|| format!("Failed to read image {}", image_path.display()))?;

    let response = service
        .predict(ImageInput::RawBytes(bytes.clone()))
        .context("Model is not available")?;

    let mut output = serde_json::to_value(&response)?;
    match &response {
        PredictionResponse::Ok(result) => {
            print_prediction(result);
            if args.portion {
                let portion = service.estimate_portion(ImageInput::RawBytes(bytes), Some(result))?;
                println!(
                    "  Portion: {:?} (x{}, brightness {:.2})",
                    portion.portion_size, portion.portion_multiplier, portion.brightness
                );
                output["portion"] = serde_json::to_value(&portion)?;
            }
        }
        PredictionResponse::Fallback(fallback) => {
            println!("{} {}", "Prediction failed:".red().bold(), fallback.error);
        }
    }

    if let Some(path) = &args.save {
        output["image"] = json!(image_path.display().to_string());
        fs::write(path, serde_json::to_string_pretty(&output)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Result saved to {}", path.display());
    }

    Ok(())
}

fn print_status(status: &ModelStatus) {
    let state = format!("{:?}", status.state);
    let state = match status.state {
        LifecycleState::Loaded => state.green().bold(),
        LifecycleState::Failed => state.red().bold(),
        _ => state.yellow().bold(),
    };
    println!("Model state: {state}");
    if let Some(metadata) = &status.metadata {
        println!("  Artifact:    {}", metadata.artifact_path.display());
        println!("  Input shape: {:?}", metadata.input_shape);
        for output in &metadata.outputs {
            println!("  Output:      {} {:?}", output.name, output.shape);
        }
        println!("  Classes:     {}", metadata.class_names.len());
        if let Some(epoch) = metadata.trained_epoch {
            println!("  Epoch:       {epoch}");
        }
        println!("  Loaded at:   {}", metadata.loaded_at.to_rfc3339());
    }
    if let Some(error) = &status.last_error {
        println!("  Last error:  {}", error.red());
    }
}

fn print_prediction(result: &PredictionResult) {
    println!();
    println!(
        "{} {} ({:.1}%)",
        "Detected:".cyan().bold(),
        result.detected_food.name.bold(),
        result.detected_food.confidence * 100.0
    );
    println!("{}", "Top 5:".cyan());
    for (rank, prediction) in result.top5.iter().enumerate() {
        println!(
            "  {}. {:<28} {:>6.2}%",
            rank + 1,
            prediction.name,
            prediction.confidence * 100.0
        );
    }

    let n = &result.nutrition;
    println!("{}", "Nutrition (per 100 g):".cyan());
    println!("  Calories: {:>7.1} kcal", n.calories);
    println!("  Protein:  {:>7.1} g", n.protein_g);
    println!("  Fat:      {:>7.1} g", n.fat_g);
    println!("  Carbs:    {:>7.1} g", n.carbs_g);
    println!("  Fiber:    {:>7.1} g", n.fiber_g);
    println!("  Sugars:   {:>7.1} g", n.sugars_g);
    println!("  Sodium:   {:>7.1} mg", n.sodium_mg);
    if !result.nutrition_flags.is_empty() {
        println!(
            "  {} negative values predicted for {}",
            "warning:".yellow(),
            result.nutrition_flags.join(", ")
        );
    }
    println!("  ({:.1} ms)", result.inference_time_ms);
}
