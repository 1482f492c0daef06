pub mod burn;
pub mod camera;
pub mod config;
pub mod controls;
pub mod detection;
pub mod display;
pub mod error;
pub mod intake;
pub mod nutrition;
pub mod recorder;
pub mod session;
pub mod session_log;
pub mod utils;
pub mod visualization;

// Re-export main types
pub use crate::config::Config;
pub use crate::detection::{Detection, Detector, FoodDetector};
pub use crate::error::NutriError;
pub use crate::intake::{FrameAssessment, IntakeLimits, IntakeStatus};
pub use crate::nutrition::{NutritionEntry, NutritionTable};
pub use crate::session::{Session, SessionStats};
