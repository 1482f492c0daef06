use opencv::{imgproc, prelude::*};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::controls::KeyBindings;
use crate::detection::{BoundingBox, Detection};
use crate::intake::{FrameAssessment, IntakeLimits, IntakeStatus};
use crate::utils::{bgr, draw_box, fill_rect, put_text};

/// BGR colour triple.
pub type Bgr = [f64; 3];

/// Top-left anchored rectangle, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Colours and panel geometry of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Box colours, picked by `class_id % palette.len()`.
    pub palette: Vec<Bgr>,
    pub box_thickness: i32,
    pub label_font_scale: f64,
    pub label_text_color: Bgr,
    pub status_panel: PanelRect,
    pub status_panel_color: Bgr,
    pub count_color: Bgr,
    pub calories_color: Bgr,
    pub sugar_color: Bgr,
    pub safe_color: Bgr,
    pub exceeded_color: Bgr,
    pub sugar_exceeded_color: Bgr,
    /// Burn panel size and distance from the top-right corner.
    pub burn_panel_width: i32,
    pub burn_panel_height: i32,
    pub burn_panel_margin: i32,
    pub burn_panel_color: Bgr,
    pub text_color: Bgr,
    /// Baseline of the first instruction line, measured up from the frame bottom.
    pub instructions_bottom_offset: i32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            palette: vec![
                [164.0, 120.0, 87.0],
                [68.0, 148.0, 228.0],
                [93.0, 97.0, 209.0],
                [178.0, 182.0, 133.0],
                [88.0, 159.0, 106.0],
                [96.0, 202.0, 231.0],
                [159.0, 124.0, 168.0],
                [169.0, 162.0, 241.0],
                [98.0, 118.0, 150.0],
                [172.0, 176.0, 184.0],
            ],
            box_thickness: 2,
            label_font_scale: 0.5,
            label_text_color: [0.0, 0.0, 0.0],
            status_panel: PanelRect { x: 10, y: 10, width: 490, height: 180 },
            status_panel_color: [50.0, 50.0, 50.0],
            count_color: [255.0, 102.0, 51.0],
            calories_color: [51.0, 204.0, 51.0],
            sugar_color: [0.0, 204.0, 255.0],
            safe_color: [0.0, 255.0, 0.0],
            exceeded_color: [0.0, 0.0, 255.0],
            sugar_exceeded_color: [0.0, 165.0, 255.0],
            burn_panel_width: 300,
            burn_panel_height: 100,
            burn_panel_margin: 10,
            burn_panel_color: [40.0, 40.0, 40.0],
            text_color: [255.0, 255.0, 255.0],
            instructions_bottom_offset: 70,
        }
    }
}

impl OverlayConfig {
    pub fn box_color(&self, class_id: usize) -> Bgr {
        self.palette[class_id % self.palette.len()]
    }

    /// Green when safe, orange for sugar alone, red otherwise.
    pub fn status_color(&self, status: IntakeStatus) -> Bgr {
        match status {
            IntakeStatus::Safe => self.safe_color,
            IntakeStatus::SugarExceeded => self.sugar_exceeded_color,
            IntakeStatus::CaloriesExceeded | IntakeStatus::BothExceeded => self.exceeded_color,
        }
    }
}

/// Pixel positions of every overlay element for one frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub status_panel: ((i32, i32), (i32, i32)),
    /// Count, calories, sugar and status lines.
    pub status_lines: [(i32, i32); 4],
    pub fps: (i32, i32),
    pub burn_panel: ((i32, i32), (i32, i32)),
    /// Title, calorie and sugar lines.
    pub burn_lines: [(i32, i32); 3],
    pub instructions: [(i32, i32); 3],
}

impl Layout {
    pub fn for_frame(width: i32, height: i32, overlay: &OverlayConfig) -> Self {
        let sp = overlay.status_panel;
        let text_x = sp.x + 10;

        let bx2 = width - overlay.burn_panel_margin;
        let bx1 = bx2 - overlay.burn_panel_width;
        let by1 = overlay.burn_panel_margin;
        let by2 = by1 + overlay.burn_panel_height;

        let iy = height - overlay.instructions_bottom_offset;

        Layout {
            status_panel: ((sp.x, sp.y), (sp.x + sp.width, sp.y + sp.height)),
            status_lines: [
                (text_x, sp.y + 30),
                (text_x, sp.y + 65),
                (text_x, sp.y + 100),
                (text_x, sp.y + 140),
            ],
            fps: (sp.x + 340, sp.y + 170),
            burn_panel: ((bx1, by1), (bx2, by2)),
            burn_lines: [(bx1 + 10, by1 + 30), (bx1 + 10, by1 + 60), (bx1 + 10, by1 + 90)],
            instructions: [(20, iy), (20, iy + 25), (20, iy + 50)],
        }
    }
}

/// Geometry of a detection's filled label tag: top-left, bottom-right, text origin.
///
/// The tag sits above the box and is pushed down so it never leaves the frame top.
pub fn label_tag_geometry(
    bbox: &BoundingBox,
    text_width: i32,
    text_height: i32,
    baseline: i32,
) -> ((i32, i32), (i32, i32), (i32, i32)) {
    let label_ymin = bbox.ymin.max(text_height + 10);
    (
        (bbox.xmin, label_ymin - text_height - 10),
        (bbox.xmin + text_width, label_ymin + baseline - 10),
        (bbox.xmin, label_ymin - 7),
    )
}

pub fn detection_label(det: &Detection) -> String {
    format!("{}: {}%", det.label, (det.confidence * 100.0) as i32)
}

/// Draws boxes, panels and instructions onto frames.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    pub overlay: OverlayConfig,
    pub limits: IntakeLimits,
    pub keys: KeyBindings,
}

impl FrameRenderer {
    pub fn new(overlay: OverlayConfig, limits: IntakeLimits, keys: KeyBindings) -> Self {
        Self { overlay, limits, keys }
    }

    pub fn render(
        &self,
        frame: &mut Mat,
        detections: &[Detection],
        assessment: &FrameAssessment,
        fps: f64,
    ) -> opencv::Result<()> {
        let layout = Layout::for_frame(frame.cols(), frame.rows(), &self.overlay);
        for det in detections {
            self.draw_detection(frame, det)?;
        }
        self.draw_status_panel(frame, &layout, assessment, fps)?;
        self.draw_burn_panel(frame, &layout, assessment)?;
        self.draw_instructions(frame, &layout)
    }

    pub fn draw_detection(&self, frame: &mut Mat, det: &Detection) -> opencv::Result<()> {
        let color = bgr(self.overlay.box_color(det.class_id));
        draw_box(frame, det.bbox.as_array(), color, self.overlay.box_thickness)?;

        let text = detection_label(det);
        let mut baseline = 0;
        let text_size = imgproc::get_text_size(
            &text,
            imgproc::FONT_HERSHEY_SIMPLEX,
            self.overlay.label_font_scale,
            1,
            &mut baseline,
        )?;
        let (tl, br, org) = label_tag_geometry(&det.bbox, text_size.width, text_size.height, baseline);
        fill_rect(frame, tl, br, color)?;
        put_text(
            frame,
            &text,
            org,
            bgr(self.overlay.label_text_color),
            self.overlay.label_font_scale,
            1,
        )
    }

    /// Count, calories, sugar and status text of the status panel.
    pub fn status_lines(&self, assessment: &FrameAssessment) -> [String; 4] {
        [
            format!("Number of food: {}", assessment.labels.len()),
            format!("Total calories: {:.1} / {}", assessment.total_calories, self.limits.calories),
            format!("Total sugar (g): {:.1} / {:.1}", assessment.total_sugar, self.limits.sugar_g),
            format!("STATUS: {}", assessment.status),
        ]
    }

    fn draw_status_panel(
        &self,
        frame: &mut Mat,
        layout: &Layout,
        assessment: &FrameAssessment,
        fps: f64,
    ) -> opencv::Result<()> {
        let o = &self.overlay;
        let (tl, br) = layout.status_panel;
        fill_rect(frame, tl, br, bgr(o.status_panel_color))?;

        let colors = [
            o.count_color,
            o.calories_color,
            o.sugar_color,
            o.status_color(assessment.status),
        ];
        let lines = self.status_lines(assessment);
        for ((text, color), org) in lines.iter().zip(colors).zip(layout.status_lines) {
            put_text(frame, text, org, bgr(color), 1.0, 2)?;
        }

        put_text(frame, &format!("FPS: {:.2}", fps), layout.fps, bgr(o.text_color), 0.7, 2)
    }

    fn draw_burn_panel(&self, frame: &mut Mat, layout: &Layout, assessment: &FrameAssessment) -> opencv::Result<()> {
        let o = &self.overlay;
        let (tl, br) = layout.burn_panel;
        fill_rect(frame, tl, br, bgr(o.burn_panel_color))?;

        let [title, calories, sugar] = layout.burn_lines;
        put_text(frame, "Burn Estimation", title, bgr(o.text_color), 0.7, 2)?;
        put_text(
            frame,
            &format!("Calories: {:.1} min", assessment.calorie_burn_minutes),
            calories,
            bgr(o.calories_color),
            0.6,
            2,
        )?;
        put_text(
            frame,
            &format!("Sugar: {:.1} min", assessment.sugar_burn_minutes),
            sugar,
            bgr(o.sugar_color),
            0.6,
            2,
        )
    }

    fn draw_instructions(&self, frame: &mut Mat, layout: &Layout) -> opencv::Result<()> {
        let lines = [
            format!("Press '{}' to Quit", self.keys.quit),
            format!("Press '{}' to Pause", self.keys.pause),
            format!("Press '{}' to Capture", self.keys.capture),
        ];
        for (text, org) in lines.iter().zip(layout.instructions) {
            put_text(frame, text, org, bgr(self.overlay.text_color), 0.6, 2)?;
        }
        Ok(())
    }
}

/// Instantaneous frames-per-second from the gap between consecutive ticks.
#[derive(Debug)]
pub struct FpsMeter {
    last: Instant,
}

impl FpsMeter {
    /// The clock starts now, so the first tick already measures a frame.
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(start: Instant) -> Self {
        Self { last: start }
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        let secs = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
