use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use opencv::{
    core::{Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::{Path, PathBuf};

use crate::config::{RecordingConfig, Resolution};

pub fn recording_file_name(config: &RecordingConfig, at: DateTime<Local>) -> String {
    format!("{}{}.{}", config.prefix, at.format("%Y%m%d_%H%M%S"), config.extension)
}

pub fn capture_file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{}{}.png", prefix, at.format("%H%M%S"))
}

/// Fixed-rate, fixed-size video writer for the annotated feed.
pub struct VideoRecorder {
    writer: VideoWriter,
    size: Size,
    path: PathBuf,
    frames: usize,
}

impl VideoRecorder {
    pub fn create(path: &Path, config: &RecordingConfig, resolution: Resolution) -> Result<Self> {
        let code: Vec<char> = config.fourcc.chars().collect();
        let &[a, b, c, d] = code.as_slice() else {
            bail!("fourcc '{}' must be 4 characters", config.fourcc);
        };
        let fourcc = VideoWriter::fourcc(a, b, c, d)?;
        let size = Size::new(resolution.width, resolution.height);
        let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, config.fps, size, true)?;
        if !writer.is_opened()? {
            bail!("failed to open video writer at {:?}", path);
        }
        Ok(Self {
            writer,
            size,
            path: path.to_path_buf(),
            frames: 0,
        })
    }

    /// Write one frame, resizing it when the camera did not honour the requested size.
    pub fn write(&mut self, frame: &Mat) -> Result<()> {
        if frame.size()? == self.size {
            self.writer.write(frame)?;
        } else {
            let mut resized = Mat::default();
            imgproc::resize(frame, &mut resized, self.size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
            self.writer.write(&resized)?;
        }
        self.frames += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn release(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}

/// Save a still image of the annotated frame.
pub fn save_capture(path: &Path, frame: &Mat) -> Result<()> {
    if !imgcodecs::imwrite(&path.to_string_lossy(), frame, &Vector::new())? {
        bail!("failed to write capture to {:?}", path);
    }
    Ok(())
}
