//! YOLOv8 pre- and post-processing, independent of the runtime

use std::cmp::Ordering;

use super::{Detection, InferenceError};
use crate::capture::decoder::PackedImage;

const PAD_VALUE: f32 = 114.0 / 255.0;

/// Mapping from model input space back to frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let x = ((x - self.pad_x) / self.scale).clamp(0.0, self.width as f32);
        let y = ((y - self.pad_y) / self.scale).clamp(0.0, self.height as f32);
        (x, y)
    }
}

/// Letterbox an RGB24 image into a `size`×`size` NCHW tensor scaled to [0, 1].
pub fn preprocess(image: &PackedImage, size: u32) -> (Vec<f32>, Letterbox) {
    let (w, h) = (image.width as usize, image.height as usize);
    let target = size as usize;

    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale) as usize).clamp(1, target);
    let new_h = ((h as f32 * scale) as usize).clamp(1, target);
    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let plane = target * target;
    let mut data = vec![PAD_VALUE; 3 * plane];

    // nearest neighbour
    for y in 0..new_h {
        let src_y = ((y as f32 / scale) as usize).min(h - 1);
        for x in 0..new_w {
            let src_x = ((x as f32 / scale) as usize).min(w - 1);
            let src = (src_y * w + src_x) * 3;
            let dst = (y + pad_y) * target + (x + pad_x);
            for ch in 0..3 {
                data[ch * plane + dst] = image.data[src + ch] as f32 / 255.0;
            }
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        width: image.width,
        height: image.height,
    };
    (data, letterbox)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let (area_a, area_b) = (area(a), area(b));
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }

    let inter = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    let inter_area = area(&inter);
    let union = area_a + area_b - inter_area;
    if union <= 0.0 {
        return 0.0;
    }
    inter_area / union
}

/// Decode a `[1, 4 + classes, N]` output into frame-space detections.
///
/// Candidates below `confidence` are dropped, then greedy per-class NMS at
/// `nms_threshold`. Result is sorted by score, highest first.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    letterbox: &Letterbox,
    confidence: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>, InferenceError> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(InferenceError::Shape {
            expected: "[1, 4 + classes, N]".into(),
            got: format!("{:?}", shape),
        });
    }
    let (rows, n) = (shape[1], shape[2]);
    if output.len() != rows * n {
        return Err(InferenceError::Shape {
            expected: format!("{} values", rows * n),
            got: format!("{} values", output.len()),
        });
    }

    let at = |row: usize, i: usize| output[row * n + i];
    let mut candidates = Vec::new();

    for i in 0..n {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row, i)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .unwrap_or((0, 0.0));
        if score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);

        candidates.push(Detection {
            bbox: [x1, y1, x2, y2],
            score,
            class_id,
            track_id: None,
        });
    }

    Ok(nms(candidates, nms_threshold))
}

pub fn nms(mut candidates: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let overlaps = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(&kept.bbox, &candidate.bbox) > threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}
