use anyhow::Result;
use opencv::{
    prelude::*,
    videoio::{self, VideoCapture},
};

use crate::config::Resolution;
use crate::error::NutriError;

/// Source of BGR frames. `Ok(None)` means the source is gone.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Option<Mat>>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A local camera opened through OpenCV.
pub struct Camera {
    capture: VideoCapture,
}

impl Camera {
    pub fn open(index: i32, resolution: Resolution) -> Result<Self> {
        let mut capture = VideoCapture::new(index, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(NutriError::CameraOpen(index).into());
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, resolution.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, resolution.height as f64)?;
        log::info!(
            "Camera {} opened at {}x{}",
            index,
            capture.get(videoio::CAP_PROP_FRAME_WIDTH)?,
            capture.get(videoio::CAP_PROP_FRAME_HEIGHT)?
        );

        Ok(Self { capture })
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        // a failed grab is reported like a disconnect
        let grabbed = match self.capture.read(&mut frame) {
            Ok(grabbed) => grabbed,
            Err(e) => {
                log::warn!("Camera read failed: {}", e);
                false
            }
        };
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn release(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}
