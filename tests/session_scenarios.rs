use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Result};
use approx::assert_relative_eq;
use opencv::{
    core::{Scalar, CV_8UC3},
    prelude::*,
};

use nutriscan::{
    camera::FrameSource,
    controls::LoopState,
    detection::BoundingBox,
    display::Display,
    session_log::SessionLogger,
    Config, Detection, FoodDetector, IntakeStatus, NutritionTable, Session,
};

struct FakeCamera {
    frames: usize,
    released: bool,
}

impl FakeCamera {
    fn with_frames(frames: usize) -> Self {
        Self { frames, released: false }
    }
}

impl FrameSource for FakeCamera {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        if self.frames == 0 {
            return Ok(None);
        }
        self.frames -= 1;
        Ok(Some(Mat::new_rows_cols_with_default(
            720,
            1280,
            CV_8UC3,
            Scalar::all(0.0),
        )?))
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        Ok(())
    }
}

/// Returns a scripted detection list per frame, then nothing.
struct ScriptedDetector {
    frames: VecDeque<Vec<Detection>>,
    fail: bool,
}

impl ScriptedDetector {
    fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames: frames.into(), fail: false }
    }

    fn failing() -> Self {
        Self { frames: VecDeque::new(), fail: true }
    }
}

impl FoodDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &Mat) -> Result<Vec<Detection>> {
        if self.fail {
            return Err(anyhow!("inference failed"));
        }
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeDisplay {
    /// Key returned by each poll, `None` meaning no key.
    polls: VecDeque<Option<i32>>,
    /// Keys returned by blocking waits.
    waits: VecDeque<Option<i32>>,
    shown: usize,
    wait_calls: usize,
    closed: bool,
}

impl Display for FakeDisplay {
    fn show(&mut self, _frame: &Mat) -> Result<()> {
        self.shown += 1;
        Ok(())
    }

    fn poll_key(&mut self) -> Result<Option<i32>> {
        Ok(self.polls.pop_front().flatten())
    }

    fn wait_key(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        assert!(timeout.is_none(), "pause must block without a timeout");
        self.wait_calls += 1;
        Ok(self.waits.pop_front().flatten())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

fn det(class_id: usize, label: &str, confidence: f32) -> Detection {
    let bbox = BoundingBox { xmin: 100, ymin: 120, xmax: 400, ymax: 500 };
    Detection::new(class_id, label, confidence, bbox)
}

fn blank() -> Mat {
    Mat::new_rows_cols_with_default(720, 1280, CV_8UC3, Scalar::all(0.0)).unwrap()
}

fn session(
    camera: FakeCamera,
    detector: ScriptedDetector,
    display: FakeDisplay,
    log_path: &std::path::Path,
) -> Session<FakeCamera, ScriptedDetector, FakeDisplay> {
    let config = Config::default();
    let logger = SessionLogger::create(log_path).unwrap();
    Session::new(&config, NutritionTable::default(), camera, detector, display, logger)
}

fn log_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn pocky_and_noodles_are_safe() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![vec![
        det(4, "Pocky Double Choco", 0.9),
        det(5, "Samyang Spicy Noodle", 0.95),
    ]]);
    let mut s = session(FakeCamera::with_frames(0), detector, FakeDisplay::default(), &dir.path().join("log.csv"));

    let processed = s.process_frame(blank(), 30.0).unwrap();
    let a = &processed.assessment;
    assert_relative_eq!(a.total_calories, 502.0);
    assert_relative_eq!(a.total_sugar, 19.0);
    assert_eq!(a.status, IntakeStatus::Safe);
    assert_relative_eq!(a.calorie_burn_minutes, 50.2);
    assert_relative_eq!(a.sugar_burn_minutes, 7.6);
}

#[test]
fn three_maggi_exceed_calories() {
    let dir = tempfile::tempdir().unwrap();
    let maggi = vec![det(1, "Maggi Sup Ayam", 0.8); 3];
    let mut s = session(
        FakeCamera::with_frames(0),
        ScriptedDetector::new(vec![maggi]),
        FakeDisplay::default(),
        &dir.path().join("log.csv"),
    );

    let a = s.process_frame(blank(), 30.0).unwrap().assessment;
    assert_relative_eq!(a.total_calories, 762.0);
    assert_relative_eq!(a.total_sugar, 6.6, epsilon = 1e-9);
    assert_eq!(a.status, IntakeStatus::CaloriesExceeded);
}

#[test]
fn detections_at_threshold_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![vec![
        det(2, "Milo Nuggets", 0.5),
        det(2, "Milo Nuggets", 0.3),
        det(0, "Dairy Milk Hazelnut", 0.51),
    ]]);
    let mut s = session(FakeCamera::with_frames(0), detector, FakeDisplay::default(), &dir.path().join("log.csv"));

    let processed = s.process_frame(blank(), 30.0).unwrap();
    assert_eq!(processed.detections.len(), 1);
    assert_eq!(processed.assessment.labels, vec!["Dairy Milk Hazelnut".to_string()]);
    assert_relative_eq!(processed.assessment.total_calories, 83.0);
}

#[test]
fn unknown_label_is_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(vec![vec![det(12, "class_12", 0.9), det(2, "Milo Nuggets", 0.9)]]);
    let mut s = session(FakeCamera::with_frames(0), detector, FakeDisplay::default(), &dir.path().join("log.csv"));

    let a = s.process_frame(blank(), 30.0).unwrap().assessment;
    assert_eq!(a.unmatched, vec!["class_12".to_string()]);
    assert_relative_eq!(a.total_calories, 74.0);
}

#[test]
fn empty_frame_is_safe_and_not_logged() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.csv");
    let mut s = session(
        FakeCamera::with_frames(1),
        ScriptedDetector::new(vec![vec![]]),
        FakeDisplay::default(),
        &log,
    );

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.logged_rows, 0);
    assert_eq!(log_lines(&log).len(), 1);
}

#[test]
fn log_rows_match_frames_with_detections_until_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.csv");
    let pocky = vec![det(4, "Pocky Double Choco", 0.9)];
    let detector = ScriptedDetector::new(vec![pocky.clone(), vec![], pocky.clone(), vec![], pocky]);
    let mut s = session(FakeCamera::with_frames(5), detector, FakeDisplay::default(), &log);

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 5);
    assert_eq!(stats.logged_rows, 3);
    assert!(stats.disconnected);
    assert_eq!(s.state(), LoopState::Stopped);

    let lines = log_lines(&log);
    assert_eq!(lines.len(), 4);
    assert!(lines[1].ends_with(",Pocky Double Choco,77.0,13.0,SAFE"));

    // cleanup ran on the disconnect path
    assert!(s.source().released);
    assert!(s.display().closed);
    assert_eq!(s.display().shown, 5);
}

#[test]
fn quit_key_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let display = FakeDisplay {
        polls: vec![None, Some('q' as i32)].into(),
        ..Default::default()
    };
    let mut s = session(
        FakeCamera::with_frames(10),
        ScriptedDetector::new(vec![]),
        display,
        &dir.path().join("log.csv"),
    );

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 2);
    assert!(!stats.disconnected);
    assert!(s.source().released);
}

#[test]
fn pause_blocks_until_next_key() {
    let dir = tempfile::tempdir().unwrap();
    let display = FakeDisplay {
        polls: vec![Some('s' as i32), Some('q' as i32)].into(),
        waits: vec![Some('x' as i32)].into(),
        ..Default::default()
    };
    let mut s = session(
        FakeCamera::with_frames(10),
        ScriptedDetector::new(vec![]),
        display,
        &dir.path().join("log.csv"),
    );

    s.step().unwrap();
    assert_eq!(s.state(), LoopState::Paused);
    assert_eq!(s.stats().frames, 1);
    s.step().unwrap();
    assert_eq!(s.state(), LoopState::Running);
    assert_eq!(s.stats().frames, 1);

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 2);
    assert_eq!(s.display().wait_calls, 1);
}

#[test]
fn keyless_wait_while_paused_resumes_instead_of_spinning() {
    let dir = tempfile::tempdir().unwrap();
    // the window is gone: every blocking wait returns at once with no key
    let display = FakeDisplay {
        polls: vec![Some('s' as i32), None, Some('q' as i32)].into(),
        waits: vec![None, None, None].into(),
        ..Default::default()
    };
    let mut s = session(
        FakeCamera::with_frames(10),
        ScriptedDetector::new(vec![]),
        display,
        &dir.path().join("log.csv"),
    );

    s.step().unwrap();
    assert_eq!(s.state(), LoopState::Paused);
    s.step().unwrap();
    assert_eq!(s.state(), LoopState::Running);

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 3);
    assert_eq!(s.display().wait_calls, 1);
    assert!(s.source().released);
    assert!(s.display().closed);
}

#[test]
fn quit_while_paused_stops() {
    let dir = tempfile::tempdir().unwrap();
    let display = FakeDisplay {
        polls: vec![Some('s' as i32)].into(),
        waits: vec![Some('q' as i32)].into(),
        ..Default::default()
    };
    let mut s = session(
        FakeCamera::with_frames(10),
        ScriptedDetector::new(vec![]),
        display,
        &dir.path().join("log.csv"),
    );

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 1);
    assert_eq!(s.state(), LoopState::Stopped);
}

#[test]
fn capture_key_saves_annotated_frame_and_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let display = FakeDisplay {
        polls: vec![Some('p' as i32), None, Some('q' as i32)].into(),
        ..Default::default()
    };
    let mut s = session(
        FakeCamera::with_frames(10),
        ScriptedDetector::new(vec![]),
        display,
        &dir.path().join("log.csv"),
    )
    .with_capture_dir(dir.path());

    s.step().unwrap();
    assert_eq!(s.state(), LoopState::Running);
    assert_eq!(s.stats().captures.len(), 1);

    let capture = &s.stats().captures[0];
    assert!(capture.exists());
    let name = capture.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("capture_") && name.ends_with(".png"));

    let stats = s.run().unwrap();
    assert_eq!(stats.frames, 3);
}

#[test]
fn detector_failure_still_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.csv");
    let mut s = session(FakeCamera::with_frames(3), ScriptedDetector::failing(), FakeDisplay::default(), &log);

    assert!(s.run().is_err());
    assert_eq!(s.state(), LoopState::Stopped);
    assert!(s.source().released);
    assert!(s.display().closed);
    assert_eq!(log_lines(&log).len(), 1);
}
