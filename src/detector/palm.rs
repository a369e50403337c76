use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::Session;
use ort::value::Tensor;

use super::{
    ort::open_session,
    preprocess::{Letterbox, letterbox},
};
use crate::types::Frame;

pub const PALM_INPUT_SIZE: u32 = 192;
const PALM_KEYPOINTS: usize = 7;
const BOX_FEATURES: usize = 4 + PALM_KEYPOINTS * 2;
const NMS_IOU_THRESHOLD: f32 = 0.3;
// Feature map strides of the SSD head; equal strides share one grid.
const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;
// Palm box to hand crop expansion, as in MediaPipe's hand ROI.
const CROP_SCALE: f32 = 2.6;
const CROP_SHIFT: f32 = 0.5;

#[derive(Clone, Debug)]
pub struct PalmRegion {
    /// `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f32; 4],
    /// Seven palm keypoints; 0 is the wrist, 2 the middle finger base.
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

pub struct PalmDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    min_score: f32,
}

impl PalmDetector {
    pub fn load(model_path: &Path, min_score: f32) -> Result<Self> {
        let session = open_session(model_path, "palm detector")?;
        Ok(Self {
            session,
            anchors: generate_anchors(PALM_INPUT_SIZE),
            min_score,
        })
    }

    /// Palms sorted by descending score after non-maximum suppression.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = letterbox(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected 2",
                outputs.len()
            ));
        }
        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();

        let candidates = decode(&boxes, &scores, &self.anchors, &letterbox, self.min_score)?;
        Ok(suppress(candidates, NMS_IOU_THRESHOLD))
    }
}

pub fn generate_anchors(input_size: u32) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < ANCHOR_STRIDES.len() {
        let stride = ANCHOR_STRIDES[layer];
        let mut per_cell = 0;
        while layer < ANCHOR_STRIDES.len() && ANCHOR_STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let cells = input_size.div_ceil(stride);
        for y in 0..cells {
            for x in 0..cells {
                let cx = (x as f32 + 0.5) / cells as f32;
                let cy = (y as f32 + 0.5) / cells as f32;
                anchors.extend(std::iter::repeat_n([cx, cy], per_cell));
            }
        }
    }
    anchors
}

fn decode(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    letterbox: &Letterbox,
    min_score: f32,
) -> Result<Vec<PalmRegion>> {
    if boxes.len() < anchors.len() * BOX_FEATURES || scores.len() < anchors.len() {
        return Err(anyhow!(
            "palm outputs too small: {} box values and {} scores for {} anchors",
            boxes.len(),
            scores.len(),
            anchors.len()
        ));
    }

    let input = PALM_INPUT_SIZE as f32;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let bias_x = letterbox.pad_x / letterbox.scale;
    let bias_y = letterbox.pad_y / letterbox.scale;
    let max_x = letterbox.orig_w.saturating_sub(1) as f32;
    let max_y = letterbox.orig_h.saturating_sub(1) as f32;
    let to_frame = |nx: f32, ny: f32| (nx * scale - bias_x, ny * scale - bias_y);

    let mut regions = Vec::new();
    for (idx, anchor) in anchors.iter().enumerate() {
        let score = sigmoid(scores[idx]);
        if score < min_score {
            continue;
        }

        let raw = &boxes[idx * BOX_FEATURES..(idx + 1) * BOX_FEATURES];
        let cx = raw[0] / input + anchor[0];
        let cy = raw[1] / input + anchor[1];
        let half_w = raw[2] / input / 2.0;
        let half_h = raw[3] / input / 2.0;
        let (x1, y1) = to_frame(cx - half_w, cy - half_h);
        let (x2, y2) = to_frame(cx + half_w, cy + half_h);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let keypoints = raw[4..]
            .chunks_exact(2)
            .map(|kp| to_frame(kp[0] / input + anchor[0], kp[1] / input + anchor[1]))
            .collect();

        regions.push(PalmRegion {
            bbox: [
                x1.clamp(0.0, max_x),
                y1.clamp(0.0, max_y),
                x2.clamp(0.0, max_x),
                y2.clamp(0.0, max_y),
            ],
            keypoints,
            score,
        });
    }
    Ok(regions)
}

fn suppress(mut candidates: Vec<PalmRegion>, iou_threshold: f32) -> Vec<PalmRegion> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<PalmRegion> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Center, side and rotation of the square handpose crop for a palm. The crop
/// is rotated so the wrist → middle-finger axis points up.
pub fn hand_crop(palm: &PalmRegion) -> ((f32, f32), f32, f32) {
    let angle = match (palm.keypoints.first(), palm.keypoints.get(2)) {
        (Some(&(x0, y0)), Some(&(x2, y2))) => normalize_angle(PI / 2.0 - (y0 - y2).atan2(x2 - x0)),
        _ => 0.0,
    };

    let width = palm.bbox[2] - palm.bbox[0];
    let height = palm.bbox[3] - palm.bbox[1];
    let (sin, cos) = angle.sin_cos();
    let shift = CROP_SHIFT * height;
    let center = (
        (palm.bbox[0] + palm.bbox[2]) / 2.0 + shift * sin,
        (palm.bbox[1] + palm.bbox[3]) / 2.0 - shift * cos,
    );
    let side = width.max(height) * CROP_SCALE;
    (center, side, angle)
}

fn normalize_angle(angle: f32) -> f32 {
    angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor()
}
