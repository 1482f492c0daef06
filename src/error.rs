use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the nutriscan library.
#[derive(Debug, Error)]
pub enum NutriError {
    #[error("model file not found at: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("failed to load model {}: {source}", .path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: tch::TchError,
    },

    #[error("failed to open camera {0}")]
    CameraOpen(i32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid nutrition table: {0}")]
    InvalidNutrition(String),

    #[error("unsupported model output shape {0:?}")]
    UnsupportedModelOutput(Vec<i64>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NutriError>;
