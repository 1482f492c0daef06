use opencv::{
    core::{Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

/// Perform class-aware non-max suppression on `[x1, y1, x2, y2]` boxes, return indices to keep.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], classes: &[usize], iou_thresh: f32) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_unstable_by(|&i, &j| scores[j].total_cmp(&scores[i]));
    let mut keep = Vec::new();
    while let Some(&i) = idxs.first() {
        keep.push(i);
        idxs = idxs
            .into_iter()
            .skip(1)
            .filter(|&j| classes[i] != classes[j] || compute_iou(&boxes[i], &boxes[j]) <= iou_thresh)
            .collect();
    }
    keep
}

/// Compute IoU between two boxes given as `[x1, y1, x2, y2]`.
pub fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let a_area = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let b_area = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);

    let union = a_area + b_area - inter_area;
    if union <= 0.0 {
        return 0.0;
    }
    inter_area / union
}

pub fn bgr(color: [f64; 3]) -> Scalar {
    Scalar::new(color[0], color[1], color[2], 0.0)
}

pub fn draw_box(img: &mut Mat, bbox: [i32; 4], color: Scalar, thickness: i32) -> opencv::Result<()> {
    let rect = Rect::new(bbox[0], bbox[1], bbox[2] - bbox[0], bbox[3] - bbox[1]);
    imgproc::rectangle(img, rect, color, thickness, imgproc::LINE_8, 0)
}

pub fn fill_rect(img: &mut Mat, top_left: (i32, i32), bottom_right: (i32, i32), color: Scalar) -> opencv::Result<()> {
    imgproc::rectangle_points(
        img,
        Point::new(top_left.0, top_left.1),
        Point::new(bottom_right.0, bottom_right.1),
        color,
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )
}

pub fn put_text(
    img: &mut Mat,
    text: &str,
    org: (i32, i32),
    color: Scalar,
    font_scale: f64,
    thickness: i32,
) -> opencv::Result<()> {
    let point = Point::new(org.0, org.1);
    imgproc::put_text(
        img,
        text,
        point,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        color,
        thickness,
        imgproc::LINE_8,
        false,
    )
}
