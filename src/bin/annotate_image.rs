use anyhow::{bail, Result};
use clap::Parser;
use opencv::{core::Vector, imgcodecs, prelude::*};
use serde::Serialize;
use std::path::PathBuf;

use nutriscan::{
    detection::retain_confident,
    session::assess_frame,
    visualization::FrameRenderer,
    Config, Detector, FoodDetector,
};

/// Run the food pipeline once on a still image.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Input image path
    #[arg(long)]
    input: PathBuf,
    /// Output image path
    #[arg(long, default_value = "annotated.jpg")]
    output: PathBuf,
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Path to the TorchScript detection model
    #[arg(long)]
    model: Option<PathBuf>,
    /// Path to a JSON nutrition table
    #[arg(long)]
    nutrition: Option<PathBuf>,
    /// Print the assessment as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    items: &'a [String],
    total_calories: f64,
    total_sugar: f64,
    status: String,
    calorie_burn_minutes: f64,
    sugar_burn_minutes: f64,
    unmatched: &'a [String],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(model) = &args.model {
        config.model_path = model.to_string_lossy().into_owned();
    }
    if let Some(nutrition) = &args.nutrition {
        config.nutrition = Some(nutrition.to_string_lossy().into_owned());
    }
    config.validate()?;
    let table = config.nutrition_table()?;

    let model_path = config.ensure_model_exists()?;
    let mut detector = Detector::new(
        &model_path,
        &config.device,
        (config.input_size[0] as i64, config.input_size[1] as i64),
        config.conf_threshold,
        config.nms_threshold,
        config.class_names.clone(),
    )?
    .with_post_nms(config.post_nms);

    let mut img = imgcodecs::imread(&args.input.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        bail!("failed to load image {:?}", args.input);
    }

    let detections = retain_confident(detector.detect(&img)?, config.conf_threshold);
    let assessment = assess_frame(&detections, &table, &config.limits, &config.burn);
    FrameRenderer::new(config.overlay.clone(), config.limits, config.keys)
        .render(&mut img, &detections, &assessment, 0.0)?;

    if !imgcodecs::imwrite(&args.output.to_string_lossy(), &img, &Vector::new())? {
        bail!("failed to write {:?}", args.output);
    }
    log::info!("Annotated image saved to {:?}", args.output);

    if args.json {
        let report = Report {
            items: &assessment.labels,
            total_calories: assessment.total_calories,
            total_sugar: assessment.total_sugar,
            status: assessment.status.to_string(),
            calorie_burn_minutes: assessment.calorie_burn_minutes,
            sugar_burn_minutes: assessment.sugar_burn_minutes,
            unmatched: &assessment.unmatched,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} item(s): {:.1} kcal, {:.1} g sugar -> {} (burn {:.1} min / {:.1} min)",
            assessment.labels.len(),
            assessment.total_calories,
            assessment.total_sugar,
            assessment.status,
            assessment.calorie_burn_minutes,
            assessment.sugar_burn_minutes
        );
    }
    Ok(())
}
