use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;

use nutriscan::{
    camera::Camera,
    display::HighguiWindow,
    recorder::{recording_file_name, VideoRecorder},
    session_log::SessionLogger,
    Config, Detector, Session,
};

#[derive(Parser)]
#[command(
    name = "nutriscan",
    about = "Real-time food detection with calorie and sugar intake limits",
    version
)]
struct Args {
    /// Path to the TorchScript detection model
    #[arg(long)]
    model: Option<PathBuf>,

    /// Camera index
    #[arg(long, default_value_t = 0)]
    cam: i32,

    /// Record the annotated feed to a timestamped video file
    #[arg(long)]
    record: bool,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a JSON nutrition table
    #[arg(long)]
    nutrition: Option<PathBuf>,

    /// Calorie limit per sitting (kcal)
    #[arg(long)]
    calorie_limit: Option<f64>,

    /// Sugar limit per sitting (g)
    #[arg(long)]
    sugar_limit: Option<f64>,

    /// Minimum detection confidence (exclusive)
    #[arg(long)]
    threshold: Option<f32>,

    /// Session log path
    #[arg(long)]
    log: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("failed to read config {:?}", path))?,
        None => Config::default(),
    };

    if let Some(model) = &args.model {
        config.model_path = model.to_string_lossy().into_owned();
    }
    if let Some(nutrition) = &args.nutrition {
        config.nutrition = Some(nutrition.to_string_lossy().into_owned());
    }
    if let Some(limit) = args.calorie_limit {
        config.limits.calories = limit;
    }
    if let Some(limit) = args.sugar_limit {
        config.limits.sugar_g = limit;
    }
    if let Some(threshold) = args.threshold {
        config.conf_threshold = threshold;
    }
    if let Some(log) = &args.log {
        config.log_path = log.to_string_lossy().into_owned();
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let table = config.nutrition_table()?;

    // Nothing else is opened until the model is known to be usable.
    let model_path = config.ensure_model_exists()?;
    log::info!("Using model: {:?}", model_path);
    let detector = Detector::new(
        &model_path,
        &config.device,
        (config.input_size[0] as i64, config.input_size[1] as i64),
        config.conf_threshold,
        config.nms_threshold,
        config.class_names.clone(),
    )?
    .with_post_nms(config.post_nms);
    log::info!(
        "{} model labels, {} nutrition entries, limits {} kcal / {} g sugar",
        config.class_names.len(),
        table.len(),
        config.limits.calories,
        config.limits.sugar_g
    );

    let camera = Camera::open(args.cam, config.capture)?;

    let recorder = if args.record {
        let path = PathBuf::from(recording_file_name(&config.recording, Local::now()));
        log::info!("Recording to {:?}", path);
        Some(VideoRecorder::create(&path, &config.recording, config.capture)?)
    } else {
        None
    };

    let logger = SessionLogger::create(&config.log_path)
        .with_context(|| format!("failed to create log {}", config.log_path))?;
    log::info!("Logging detections to {}", config.log_path);

    let window = HighguiWindow::open(&config.window_name, config.capture.width, config.capture.height)?;

    let mut session = Session::new(&config, table, camera, detector, window, logger);
    if let Some(recorder) = recorder {
        session = session.with_recorder(recorder);
    }

    let stats = session.run()?;
    if stats.disconnected {
        log::warn!("Stopped after camera disconnect");
    }
    Ok(())
}
