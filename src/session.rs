use anyhow::{Context, Result};
use chrono::Local;
use opencv::prelude::*;
use std::path::PathBuf;

use crate::burn::BurnRates;
use crate::camera::FrameSource;
use crate::config::Config;
use crate::controls::{next_state, KeyBindings, LoopState};
use crate::detection::{retain_confident, Detection, FoodDetector};
use crate::display::Display;
use crate::intake::{self, FrameAssessment, IntakeLimits};
use crate::nutrition::NutritionTable;
use crate::recorder::{capture_file_name, save_capture, VideoRecorder};
use crate::session_log::SessionLogger;
use crate::visualization::{FpsMeter, FrameRenderer};

/// Build the per-frame assessment from already-filtered detections.
pub fn assess_frame(
    detections: &[Detection],
    table: &NutritionTable,
    limits: &IntakeLimits,
    burn: &BurnRates,
) -> FrameAssessment {
    let labels: Vec<String> = detections.iter().map(|d| d.label.clone()).collect();
    let summary = intake::evaluate(&labels, table, limits);
    let burn_time = burn.estimate(summary.total_calories, summary.total_sugar);
    FrameAssessment {
        labels,
        total_calories: summary.total_calories,
        total_sugar: summary.total_sugar,
        status: summary.status,
        calorie_burn_minutes: burn_time.calorie_minutes,
        sugar_burn_minutes: burn_time.sugar_minutes,
        unmatched: summary.unmatched,
    }
}

/// Output of one pass through the pipeline.
pub struct ProcessedFrame {
    pub annotated: Mat,
    pub detections: Vec<Detection>,
    pub assessment: FrameAssessment,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: usize,
    pub logged_rows: usize,
    pub captures: Vec<PathBuf>,
    /// The loop ended because the frame source went away.
    pub disconnected: bool,
}

/// The main loop: owns the camera, detector, window, log and optional recorder.
pub struct Session<S: FrameSource, D: FoodDetector, W: Display> {
    source: S,
    detector: D,
    display: W,
    table: NutritionTable,
    limits: IntakeLimits,
    burn: BurnRates,
    conf_threshold: f32,
    keys: KeyBindings,
    renderer: FrameRenderer,
    logger: Option<SessionLogger>,
    recorder: Option<VideoRecorder>,
    capture_dir: PathBuf,
    capture_prefix: String,
    fps: FpsMeter,
    state: LoopState,
    stats: SessionStats,
    cleaned_up: bool,
}

impl<S: FrameSource, D: FoodDetector, W: Display> Session<S, D, W> {
    pub fn new(
        config: &Config,
        table: NutritionTable,
        source: S,
        detector: D,
        display: W,
        logger: SessionLogger,
    ) -> Self {
        Self {
            source,
            detector,
            display,
            table,
            limits: config.limits,
            burn: config.burn,
            conf_threshold: config.conf_threshold,
            keys: config.keys,
            renderer: FrameRenderer::new(config.overlay.clone(), config.limits, config.keys),
            logger: Some(logger),
            recorder: None,
            capture_dir: PathBuf::from("."),
            capture_prefix: config.capture_prefix.clone(),
            fps: FpsMeter::new(),
            state: LoopState::Running,
            stats: SessionStats::default(),
            cleaned_up: false,
        }
    }

    pub fn with_recorder(mut self, recorder: VideoRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn display(&self) -> &W {
        &self.display
    }

    /// Detect, assess and annotate a single frame.
    pub fn process_frame(&mut self, mut frame: Mat, fps: f64) -> Result<ProcessedFrame> {
        let detections = retain_confident(self.detector.detect(&frame)?, self.conf_threshold);
        log::debug!("{} detections above {:.2}", detections.len(), self.conf_threshold);

        let assessment = assess_frame(&detections, &self.table, &self.limits, &self.burn);
        self.renderer
            .render(&mut frame, &detections, &assessment, fps)
            .context("failed to draw overlay")?;

        Ok(ProcessedFrame {
            annotated: frame,
            detections,
            assessment,
        })
    }

    /// Advance the state machine by one iteration.
    pub fn step(&mut self) -> Result<()> {
        match self.state {
            LoopState::Running | LoopState::Captured => self.step_running(),
            LoopState::Paused => {
                let key = self.display.wait_key(None)?;
                if key.is_none() {
                    log::warn!("Pause wait ended without a key press");
                }
                let action = key.and_then(|k| self.keys.action_for(k));
                self.state = next_state(LoopState::Paused, action);
                if self.state == LoopState::Running {
                    log::info!("Resumed");
                }
                Ok(())
            }
            LoopState::Stopped => Ok(()),
        }
    }

    fn step_running(&mut self) -> Result<()> {
        let Some(frame) = self.source.read_frame()? else {
            log::warn!("Camera disconnected or not working.");
            self.stats.disconnected = true;
            self.state = LoopState::Stopped;
            return Ok(());
        };

        let fps = self.fps.tick();
        let processed = self.process_frame(frame, fps)?;
        self.display.show(&processed.annotated)?;

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.write(&processed.annotated)?;
        }
        if let Some(logger) = self.logger.as_mut() {
            if logger.record(&processed.assessment)? {
                self.stats.logged_rows += 1;
            }
        }
        self.stats.frames += 1;

        let key = self.display.poll_key()?;
        let action = key.and_then(|k| self.keys.action_for(k));
        self.state = next_state(LoopState::Running, action);

        match self.state {
            LoopState::Captured => {
                let path = self
                    .capture_dir
                    .join(capture_file_name(&self.capture_prefix, Local::now()));
                save_capture(&path, &processed.annotated)?;
                log::info!("Saved capture to {:?}", path);
                self.stats.captures.push(path);
                self.state = next_state(LoopState::Captured, None);
            }
            LoopState::Paused => log::info!("Paused, press any key to resume"),
            LoopState::Stopped => log::info!("Quit requested"),
            LoopState::Running => {}
        }
        Ok(())
    }

    /// Run until stopped. Cleanup runs on every exit path.
    pub fn run(&mut self) -> Result<SessionStats> {
        let outcome = self.run_loop();
        if outcome.is_err() {
            self.state = LoopState::Stopped;
        }
        let cleanup = self.shutdown();
        outcome?;
        cleanup?;
        Ok(self.stats.clone())
    }

    fn run_loop(&mut self) -> Result<()> {
        self.fps = FpsMeter::new();
        while !self.state.is_terminal() {
            self.step()?;
        }
        Ok(())
    }

    /// Release the camera, recorder, log and window, in that order.
    ///
    /// Every step is attempted; the first failure is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;

        let mut first_err: Option<anyhow::Error> = None;
        let mut note = |result: Result<()>| {
            if let Err(e) = result {
                log::error!("Cleanup failed: {:#}", e);
                first_err.get_or_insert(e);
            }
        };

        note(self.source.release().context("failed to release camera"));
        if let Some(mut recorder) = self.recorder.take() {
            let frames = recorder.frames();
            let path = recorder.path().to_path_buf();
            note(recorder.release().context("failed to close recording"));
            log::info!("Recorded {} frames to {:?}", frames, path);
        }
        if let Some(mut logger) = self.logger.take() {
            note(logger.flush().context("failed to flush session log"));
        }
        note(self.display.close().context("failed to close window"));

        log::info!(
            "Session ended: {} frames, {} logged, {} captures",
            self.stats.frames,
            self.stats.logged_rows,
            self.stats.captures.len()
        );

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
