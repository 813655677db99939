//! Post-processing for YOLOv8/YOLO11-style detection heads.
//!
//! The exported ONNX graph produces one tensor of shape `[1, 4 + nc, anchors]`
//! (or its transpose `[1, anchors, 4 + nc]`). Each anchor carries a
//! center-encoded box in model-input pixels followed by one score per class.
//! This module letterboxes frames into the model input, decodes that tensor,
//! runs class-aware non-max suppression and maps boxes back to source pixels.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use zeroize::Zeroize;

use crate::detect::result::{BoxXyxy, RawBoxes};

/// Gray used for letterbox padding (114/255), matching the training pipeline.
const PAD_VALUE: f32 = 114.0 / 255.0;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum class score for a candidate box.
    pub confidence: f32,
    /// Boxes of the same class overlapping a stronger box above this IoU are dropped.
    pub iou: f32,
    pub max_detections: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            iou: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

/// Geometry of a letterbox resize, needed to undo it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    /// Map a center-encoded box in model-input pixels to a corner box in
    /// source pixels, clamped to the source image.
    pub fn to_source(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoxXyxy {
        let max_x = self.orig_w as f32;
        let max_y = self.orig_h as f32;
        BoxXyxy {
            x1: (((cx - w / 2.0) - self.pad_x) / self.scale).clamp(0.0, max_x),
            y1: (((cy - h / 2.0) - self.pad_y) / self.scale).clamp(0.0, max_y),
            x2: (((cx + w / 2.0) - self.pad_x) / self.scale).clamp(0.0, max_x),
            y2: (((cy + h / 2.0) - self.pad_y) / self.scale).clamp(0.0, max_y),
        }
    }
}

/// Resize an RGB8 frame into a `3 x input_h x input_w` CHW tensor in `[0, 1]`,
/// preserving aspect ratio and padding the remainder. Intermediate pixel
/// copies are zeroized before returning.
pub fn letterbox(
    pixels: &[u8],
    width: u32,
    height: u32,
    input_w: u32,
    input_h: u32,
) -> Result<(Vec<f32>, Letterbox)> {
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot letterbox an empty {}x{} frame", width, height));
    }
    let source = image::RgbImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| anyhow!("pixel buffer does not match {}x{} RGB", width, height))?;

    let scale = (input_w as f32 / width as f32).min(input_h as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_w);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_h);
    let resized = image::imageops::resize(&source, new_w, new_h, FilterType::Triangle);
    source.into_raw().zeroize();

    let offset_x = ((input_w - new_w) / 2) as usize;
    let offset_y = ((input_h - new_h) / 2) as usize;
    let plane = input_w as usize * input_h as usize;
    let mut tensor = vec![PAD_VALUE; plane * 3];

    let mut raw = resized.into_raw();
    let row_w = new_w as usize;
    for y in 0..new_h as usize {
        for x in 0..row_w {
            let src = (y * row_w + x) * 3;
            let dst = (offset_y + y) * input_w as usize + offset_x + x;
            for channel in 0..3 {
                tensor[channel * plane + dst] = raw[src + channel] as f32 / 255.0;
            }
        }
    }
    raw.zeroize();

    Ok((
        tensor,
        Letterbox {
            scale,
            pad_x: offset_x as f32,
            pad_y: offset_y as f32,
            orig_w: width,
            orig_h: height,
        },
    ))
}

/// A decoded box before suppression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub class_id: u32,
    pub confidence: f32,
    pub xyxy: BoxXyxy,
}

/// Decode a raw head output into per-box arrays in source pixels.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    num_classes: usize,
    letterbox: &Letterbox,
    thresholds: &Thresholds,
) -> Result<RawBoxes> {
    let features = 4 + num_classes;
    if shape.len() != 3 || shape[0] != 1 {
        return Err(anyhow!("expected output shape [1, F, A], got {:?}", shape));
    }
    // [1, F, A] is the usual export; [1, A, F] shows up after some conversions.
    let (anchors, feature_major) = if shape[1] == features {
        (shape[2], true)
    } else if shape[2] == features {
        (shape[1], false)
    } else {
        return Err(anyhow!(
            "output shape {:?} does not carry {} features for {} classes",
            shape,
            features,
            num_classes
        ));
    };
    if output.len() != anchors * features {
        return Err(anyhow!(
            "output holds {} values, shape {:?} needs {}",
            output.len(),
            shape,
            anchors * features
        ));
    }
    let value = |anchor: usize, feature: usize| {
        if feature_major {
            output[feature * anchors + anchor]
        } else {
            output[anchor * features + feature]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = value(anchor, 4 + class);
            if score > best_score {
                best_class = class;
                best_score = score;
            }
        }
        if !best_score.is_finite() || best_score < thresholds.confidence {
            continue;
        }

        let (cx, cy, w, h) = (
            value(anchor, 0),
            value(anchor, 1),
            value(anchor, 2),
            value(anchor, 3),
        );
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
            continue;
        }
        let xyxy = letterbox.to_source(cx, cy, w, h);
        if xyxy.x2 - xyxy.x1 <= 0.0 || xyxy.y2 - xyxy.y1 <= 0.0 {
            continue;
        }
        candidates.push(Candidate {
            class_id: best_class as u32,
            confidence: best_score.min(1.0),
            xyxy,
        });
    }

    let kept = non_max_suppression(candidates, thresholds.iou, thresholds.max_detections);

    let mut boxes = RawBoxes {
        xywh: Some(Vec::with_capacity(kept.len())),
        ..RawBoxes::default()
    };
    for candidate in kept {
        let b = candidate.xyxy;
        boxes.push(candidate.class_id, candidate.confidence, [b.x1, b.y1, b.x2, b.y2]);
        if let Some(xywh) = boxes.xywh.as_mut() {
            let c = b.to_xywh();
            xywh.push([c.center_x, c.center_y, c.width, c.height]);
        }
    }
    Ok(boxes)
}

/// Greedy class-aware NMS. Output is ordered by descending confidence;
/// equal confidences keep their input order.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; candidates.len()];
    let mut kept = Vec::new();
    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(candidates[i]);
        if kept.len() == max_detections {
            break;
        }
        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[j].class_id != candidates[i].class_id {
                continue;
            }
            if candidates[i].xyxy.iou(&candidates[j].xyxy) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    kept
}
