use anyhow::{Context, Result};
use num_traits::ToPrimitive;
use opencv::{
    core::{Mat, Size, Vec3f, CV_32F},
    imgproc,
    prelude::*,
};
use std::path::Path;
use tch::{Device, IValue, Kind, Tensor};

use crate::error::NutriError;
use crate::utils;

/// Axis-aligned box in frame pixels, always non-empty and inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BoundingBox {
    /// Clip a float box to `width x height`; `None` when nothing is left.
    pub fn clipped(x1: f32, y1: f32, x2: f32, y2: f32, width: i32, height: i32) -> Option<Self> {
        let max_x = (width - 1).max(0) as f32;
        let max_y = (height - 1).max(0) as f32;
        let xmin = x1.min(x2).clamp(0.0, max_x) as i32;
        let ymin = y1.min(y2).clamp(0.0, max_y) as i32;
        let xmax = x1.max(x2).clamp(0.0, max_x) as i32;
        let ymax = y1.max(y2).clamp(0.0, max_y) as i32;
        if xmin < xmax && ymin < ymax {
            Some(Self { xmin, ymin, xmax, ymax })
        } else {
            None
        }
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

/// A single detection result.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: usize, label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Anything that turns a BGR frame into detections.
pub trait FoodDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

/// Drop every detection whose confidence is not strictly above `threshold`.
pub fn retain_confident(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|det| det.confidence > threshold)
        .collect()
}

/// Memory layout of a detector's output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[1, 4 + nc, N]`: cx, cy, w, h then class scores, one column per anchor.
    ChannelsFirst { anchors: usize },
    /// `[1, N, 4 + nc]`: the same fields, one row per anchor.
    Rows { anchors: usize },
    /// `[1, N, 5 + nc]`: cx, cy, w, h, objectness then class scores.
    Objectness { anchors: usize },
    /// `[1, N, 6]`: x1, y1, x2, y2, confidence, class id after NMS.
    PostNms { rows: usize },
}

impl OutputLayout {
    /// Infer the layout from the tensor shape.
    ///
    /// `[1, N, 6]` is also a valid `Rows` shape with two classes; `post_nms`
    /// settles that case in favour of `PostNms`.
    pub fn from_shape(shape: &[i64], num_classes: usize, post_nms: bool) -> Result<Self, NutriError> {
        let unsupported = || NutriError::UnsupportedModelOutput(shape.to_vec());
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 0 || shape[2] < 0 {
            return Err(unsupported());
        }
        let (a, b) = (shape[1] as usize, shape[2] as usize);
        let nc = num_classes;

        if post_nms && b == 6 {
            Ok(OutputLayout::PostNms { rows: a })
        } else if a == 4 + nc && a < b {
            Ok(OutputLayout::ChannelsFirst { anchors: b })
        } else if b == 4 + nc {
            Ok(OutputLayout::Rows { anchors: a })
        } else if b == 5 + nc {
            Ok(OutputLayout::Objectness { anchors: a })
        } else if b == 6 {
            Ok(OutputLayout::PostNms { rows: a })
        } else {
            Err(unsupported())
        }
    }

    pub fn needs_nms(&self) -> bool {
        !matches!(self, OutputLayout::PostNms { .. })
    }
}

/// A decoded box in model-input coordinates, before scaling and clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub xyxy: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

fn best_class(scores: impl Iterator<Item = f32>) -> (usize, f32) {
    scores
        .enumerate()
        .fold((0, f32::MIN), |best, (c, s)| if s > best.1 { (c, s) } else { best })
}

fn center_to_corners(cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Decode a flattened output tensor, keeping candidates strictly above `conf_threshold`.
pub fn decode_output(
    data: &[f32],
    layout: OutputLayout,
    num_classes: usize,
    conf_threshold: f32,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut push = |xyxy: [f32; 4], confidence: f32, class_id: usize| {
        if confidence > conf_threshold {
            candidates.push(Candidate { xyxy, confidence, class_id });
        }
    };

    match layout {
        OutputLayout::ChannelsFirst { anchors } => {
            let at = |channel: usize, i: usize| data[channel * anchors + i];
            for i in 0..anchors {
                let (class_id, score) = best_class((0..num_classes).map(|c| at(4 + c, i)));
                push(center_to_corners(at(0, i), at(1, i), at(2, i), at(3, i)), score, class_id);
            }
        }
        OutputLayout::Rows { anchors } => {
            let stride = 4 + num_classes;
            for row in data.chunks_exact(stride).take(anchors) {
                let (class_id, score) = best_class(row[4..].iter().copied());
                push(center_to_corners(row[0], row[1], row[2], row[3]), score, class_id);
            }
        }
        OutputLayout::Objectness { anchors } => {
            let stride = 5 + num_classes;
            for row in data.chunks_exact(stride).take(anchors) {
                let (class_id, score) = best_class(row[5..].iter().copied());
                push(center_to_corners(row[0], row[1], row[2], row[3]), row[4] * score, class_id);
            }
        }
        OutputLayout::PostNms { rows } => {
            for row in data.chunks_exact(6).take(rows) {
                let Some(class_id) = row[5].round().to_usize() else {
                    continue;
                };
                push([row[0], row[1], row[2], row[3]], row[4], class_id);
            }
        }
    }
    candidates
}

/// Wraps a TorchScript export of the food detection model.
pub struct Detector {
    model: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    pub class_names: Vec<String>,
    /// Treat `[1, N, 6]` outputs as already suppressed.
    pub post_nms: bool,
}

impl Detector {
    /// Load the model from disk onto `device` ("cpu"/"cuda").
    pub fn new(
        model_path: &Path,
        device: &str,
        input_size: (i64, i64),
        conf_threshold: f32,
        nms_threshold: f32,
        class_names: Vec<String>,
    ) -> Result<Self, NutriError> {
        if !model_path.is_file() {
            return Err(NutriError::ModelNotFound(model_path.to_path_buf()));
        }

        let device = if device == "cuda" && tch::Cuda::is_available() {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let mut model = tch::CModule::load_on_device(model_path, device).map_err(|source| {
            NutriError::ModelLoad {
                path: model_path.to_path_buf(),
                source,
            }
        })?;
        model.set_eval();

        Ok(Detector {
            model,
            device,
            input_size,
            conf_threshold,
            nms_threshold,
            class_names,
            post_nms: false,
        })
    }

    pub fn with_post_nms(mut self, post_nms: bool) -> Self {
        self.post_nms = post_nms;
        self
    }

    pub fn label_for(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    /// Resize, BGR -> RGB, scale to [0,1] and lay out as NCHW.
    fn preprocess(&self, frame: &Mat) -> Result<Tensor> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.input_size.0 as i32, self.input_size.1 as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&resized, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32F, 1.0 / 255.0, 0.0)?;

        let rows = float_mat.rows() as i64;
        let cols = float_mat.cols() as i64;
        let data: Vec<f32> = float_mat
            .data_typed::<Vec3f>()?
            .iter()
            .flat_map(|px| px.0)
            .collect();

        let tensor = Tensor::from_slice(&data)
            .reshape(&[1, rows, cols, 3])
            .permute(&[0, 3, 1, 2])
            .contiguous()
            .to_device(self.device)
            .to_kind(Kind::Float);

        Ok(tensor)
    }

    fn inference(&self, input: &Tensor) -> Result<Tensor> {
        let output = tch::no_grad(|| self.model.forward_is(&[IValue::Tensor(input.shallow_clone())]))?;
        first_tensor(output).context("model returned no tensor output")
    }

    /// Turn the raw output into frame-space detections.
    fn postprocess(&self, output: &Tensor, frame_size: (i32, i32)) -> Result<Vec<Detection>> {
        let output = output.to_device(Device::Cpu).to_kind(Kind::Float);
        let shape = output.size();
        let layout = OutputLayout::from_shape(&shape, self.class_names.len(), self.post_nms)?;
        let data = Vec::<f32>::try_from(&output.flatten(0, -1))?;

        let mut candidates = decode_output(&data, layout, self.class_names.len(), self.conf_threshold);
        log::debug!("{} candidates above {:.2} ({:?})", candidates.len(), self.conf_threshold, layout);

        if layout.needs_nms() && candidates.len() > 1 {
            let boxes: Vec<[f32; 4]> = candidates.iter().map(|c| c.xyxy).collect();
            let scores: Vec<f32> = candidates.iter().map(|c| c.confidence).collect();
            let classes: Vec<usize> = candidates.iter().map(|c| c.class_id).collect();
            let keep = utils::nms(&boxes, &scores, &classes, self.nms_threshold);
            candidates = keep.into_iter().map(|i| candidates[i]).collect();
        }

        let (frame_w, frame_h) = frame_size;
        let scale_w = frame_w as f32 / self.input_size.0 as f32;
        let scale_h = frame_h as f32 / self.input_size.1 as f32;

        let detections = candidates
            .into_iter()
            .filter_map(|c| {
                let [x1, y1, x2, y2] = c.xyxy;
                let bbox = BoundingBox::clipped(
                    x1 * scale_w,
                    y1 * scale_h,
                    x2 * scale_w,
                    y2 * scale_h,
                    frame_w,
                    frame_h,
                )?;
                Some(Detection::new(c.class_id, self.label_for(c.class_id), c.confidence, bbox))
            })
            .collect();

        Ok(detections)
    }
}

impl FoodDetector for Detector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let frame_size = (frame.cols(), frame.rows());
        let input = self.preprocess(frame)?;
        let output = self.inference(&input)?;
        self.postprocess(&output, frame_size)
    }
}

fn first_tensor(value: IValue) -> Option<Tensor> {
    match value {
        IValue::Tensor(t) => Some(t),
        IValue::Tuple(items) | IValue::GenericList(items) => items.into_iter().find_map(first_tensor),
        IValue::TensorList(tensors) => tensors.into_iter().next(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use std::path::PathBuf;

    fn det(confidence: f32) -> Detection {
        let bbox = BoundingBox { xmin: 0, ymin: 0, xmax: 10, ymax: 10 };
        Detection::new(0, "Milo Nuggets", confidence, bbox)
    }

    #[test]
    fn test_threshold_is_strict() {
        let kept = retain_confident(vec![det(0.49), det(0.5), det(0.51), det(0.95)], 0.5);
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.51, 0.95]);
    }

    #[test]
    fn test_bbox_clipping() {
        let bbox = BoundingBox::clipped(-20.0, 10.0, 300.0, 900.0, 1280, 720).unwrap();
        assert_eq!(bbox, BoundingBox { xmin: 0, ymin: 10, xmax: 300, ymax: 719 });
        assert!(BoundingBox::clipped(1300.0, 10.0, 1400.0, 50.0, 1280, 720).is_none());
        assert!(BoundingBox::clipped(10.0, 10.0, 10.0, 50.0, 1280, 720).is_none());
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(
            OutputLayout::from_shape(&[1, 14, 8400], 10, false).unwrap(),
            OutputLayout::ChannelsFirst { anchors: 8400 }
        );
        assert_eq!(OutputLayout::from_shape(&[1, 8400, 14], 10, false).unwrap(), OutputLayout::Rows { anchors: 8400 });
        assert_eq!(
            OutputLayout::from_shape(&[1, 25200, 15], 10, false).unwrap(),
            OutputLayout::Objectness { anchors: 25200 }
        );
        assert_eq!(OutputLayout::from_shape(&[1, 300, 6], 10, false).unwrap(), OutputLayout::PostNms { rows: 300 });
        assert!(matches!(
            OutputLayout::from_shape(&[1, 300, 9], 10, false),
            Err(NutriError::UnsupportedModelOutput(_))
        ));
        assert!(OutputLayout::from_shape(&[300, 6], 10, false).is_err());
    }

    #[test]
    fn test_six_columns_with_two_classes() {
        assert_eq!(OutputLayout::from_shape(&[1, 300, 6], 2, false).unwrap(), OutputLayout::Rows { anchors: 300 });
        assert_eq!(OutputLayout::from_shape(&[1, 300, 6], 2, true).unwrap(), OutputLayout::PostNms { rows: 300 });
        // the hint only decides six-column outputs
        assert_eq!(
            OutputLayout::from_shape(&[1, 14, 8400], 10, true).unwrap(),
            OutputLayout::ChannelsFirst { anchors: 8400 }
        );
    }

    #[test]
    fn test_decode_channels_first() {
        // two classes, three anchors laid out channel-major
        let data = vec![
            100.0, 200.0, 300.0, // cx
            100.0, 200.0, 300.0, // cy
            20.0, 20.0, 20.0, // w
            40.0, 40.0, 40.0, // h
            0.9, 0.1, 0.5, // class 0
            0.2, 0.7, 0.3, // class 1
        ];
        let out = decode_output(&data, OutputLayout::ChannelsFirst { anchors: 3 }, 2, 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].xyxy, [90.0, 80.0, 110.0, 120.0]);
        assert_eq!(out[1].class_id, 1);
        assert_eq!(out[1].confidence, 0.7);
    }

    #[test]
    fn test_decode_objectness_multiplies_scores() {
        let data = vec![
            50.0, 50.0, 10.0, 10.0, 0.8, 0.9, 0.1, // 0.72 for class 0
            50.0, 50.0, 10.0, 10.0, 0.5, 0.2, 0.9, // 0.45 for class 1
        ];
        let out = decode_output(&data, OutputLayout::Objectness { anchors: 2 }, 2, 0.5);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_decode_post_nms_rows() {
        let data = vec![
            10.0, 20.0, 110.0, 220.0, 0.93, 5.0, //
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // padding row
        ];
        let out = decode_output(&data, OutputLayout::PostNms { rows: 2 }, 10, 0.5);
        assert_eq!(
            out,
            vec![Candidate { xyxy: [10.0, 20.0, 110.0, 220.0], confidence: 0.93, class_id: 5 }]
        );
    }

    #[test]
    fn test_missing_model_fails_before_loading() {
        let result = Detector::new(Path::new("no_such_model.pt"), "cpu", (640, 640), 0.5, 0.45, vec![]);
        assert!(matches!(result, Err(NutriError::ModelNotFound(_))));
    }

    #[test]
    fn test_real_model_on_blank_frame() {
        let model_path = PathBuf::from("weights/food_detection_model.torchscript");
        if !model_path.exists() {
            return; // Skip if weights are not available
        }
        let mut detector = Detector::new(
            &model_path,
            "cpu",
            (640, 640),
            0.5,
            0.45,
            crate::NutritionTable::default().labels(),
        )
        .unwrap();

        let frame = Mat::new_rows_cols_with_default(720, 1280, CV_8UC3, Scalar::all(0.0)).unwrap();
        for det in detector.detect(&frame).unwrap() {
            assert!(det.confidence > 0.5);
            assert!(det.bbox.xmin < det.bbox.xmax && det.bbox.ymin < det.bbox.ymax);
            assert!(det.bbox.xmax < 1280 && det.bbox.ymax < 720);
        }
    }
}
