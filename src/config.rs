use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::burn::BurnRates;
use crate::controls::KeyBindings;
use crate::error::{NutriError, Result};
use crate::intake::IntakeLimits;
use crate::nutrition::NutritionTable;
use crate::visualization::OverlayConfig;

/// Frame size the camera is asked for; overlay geometry is laid out against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub fps: f64,
    /// Four-character codec code, e.g. "MJPG".
    pub fourcc: String,
    pub prefix: String,
    pub extension: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            fourcc: "MJPG".to_string(),
            prefix: "detection_".to_string(),
            extension: "avi".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_path: String,
    pub device: String,
    pub input_size: [i32; 2],
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Model label set, indexed by class id.
    pub class_names: Vec<String>,
    /// The model already applies NMS and emits `[1, N, 6]` rows.
    pub post_nms: bool,
    pub limits: IntakeLimits,
    pub burn: BurnRates,
    pub capture: Resolution,
    pub recording: RecordingConfig,
    pub log_path: String,
    pub capture_prefix: String,
    pub window_name: String,
    pub keys: KeyBindings,
    pub overlay: OverlayConfig,
    /// Optional external nutrition table; the built-in one is used otherwise.
    pub nutrition: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: "food_detection_model.pt".to_string(),
            device: "cpu".to_string(),
            input_size: [640, 640],
            conf_threshold: 0.5,
            nms_threshold: 0.45,
            class_names: NutritionTable::default().labels(),
            post_nms: false,
            limits: IntakeLimits::default(),
            burn: BurnRates::default(),
            capture: Resolution::default(),
            recording: RecordingConfig::default(),
            log_path: "detection_log.csv".to_string(),
            capture_prefix: "capture_".to_string(),
            window_name: "Food detection results".to_string(),
            keys: KeyBindings::default(),
            overlay: OverlayConfig::default(),
            nutrition: None,
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields fall back to their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.conf_threshold) {
            return Err(invalid(format!("conf_threshold {} not in [0, 1]", self.conf_threshold)));
        }
        if !unit.contains(&self.nms_threshold) {
            return Err(invalid(format!("nms_threshold {} not in [0, 1]", self.nms_threshold)));
        }
        if self.input_size[0] <= 0 || self.input_size[1] <= 0 {
            return Err(invalid(format!("input_size {:?} must be positive", self.input_size)));
        }
        if !(self.burn.kcal_per_minute > 0.0) || !(self.burn.kcal_per_sugar_gram > 0.0) {
            return Err(invalid("burn rates must be positive".to_string()));
        }
        if self.limits.calories < 0.0 || self.limits.sugar_g < 0.0 {
            return Err(invalid("intake limits must not be negative".to_string()));
        }
        if self.capture.width <= 0 || self.capture.height <= 0 {
            return Err(invalid(format!(
                "capture resolution {}x{} must be positive",
                self.capture.width, self.capture.height
            )));
        }
        if !(self.recording.fps > 0.0) {
            return Err(invalid("recording fps must be positive".to_string()));
        }
        if self.recording.fourcc.chars().count() != 4 {
            return Err(invalid(format!("fourcc '{}' must be 4 characters", self.recording.fourcc)));
        }
        if self.overlay.palette.is_empty() {
            return Err(invalid("overlay palette must not be empty".to_string()));
        }
        Ok(())
    }

    /// Fails fast when the model artifact is absent.
    pub fn ensure_model_exists(&self) -> Result<PathBuf> {
        let path = PathBuf::from(&self.model_path);
        if !path.is_file() {
            return Err(NutriError::ModelNotFound(path));
        }
        Ok(path)
    }

    pub fn nutrition_table(&self) -> Result<NutritionTable> {
        match &self.nutrition {
            Some(path) => NutritionTable::from_file(path),
            None => Ok(NutritionTable::default()),
        }
    }
}

fn invalid(msg: String) -> NutriError {
    NutriError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_original_behaviour() {
        let cfg = Config::default();
        assert_eq!(cfg.model_path, "food_detection_model.pt");
        assert_eq!(cfg.conf_threshold, 0.5);
        assert_eq!(cfg.limits.calories, 600.0);
        assert_eq!(cfg.limits.sugar_g, 25.0);
        assert_eq!(cfg.capture, Resolution { width: 1280, height: 720 });
        assert_eq!(cfg.recording.fps, 30.0);
        assert_eq!(cfg.log_path, "detection_log.csv");
        assert_eq!(cfg.class_names.len(), 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "conf_threshold": 0.7, "limits": {{ "calories": 800 }} }}"#).unwrap();
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.conf_threshold, 0.7);
        assert_eq!(cfg.limits.calories, 800.0);
        assert_eq!(cfg.limits.sugar_g, 25.0);
        assert_eq!(cfg.window_name, "Food detection results");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.conf_threshold = 1.5;
        assert!(matches!(cfg.validate(), Err(NutriError::InvalidConfig(_))));

        let mut cfg = Config::default();
        cfg.burn.kcal_per_minute = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.overlay.palette.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_model_is_reported() {
        let mut cfg = Config::default();
        cfg.model_path = "does/not/exist.pt".to_string();
        match cfg.ensure_model_exists() {
            Err(NutriError::ModelNotFound(path)) => assert_eq!(path, PathBuf::from("does/not/exist.pt")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_existing_model_passes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut cfg = Config::default();
        cfg.model_path = file.path().to_string_lossy().into_owned();
        assert_eq!(cfg.ensure_model_exists().unwrap(), file.path());
    }
}
