use std::{f32::consts::FRAC_PI_2, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::common::{CropTransform, HANDPOSE_INPUT_SIZE, Letterbox, PALM_INPUT_SIZE, letterbox_tensor};
use crate::types::Frame;

const PALM_KEYPOINTS: usize = 7;
const BOX_FEATURES: usize = 4 + PALM_KEYPOINTS * 2;
const NMS_IOU_THRESHOLD: f32 = 0.3;
const MAX_PALMS: usize = 4;
// Keypoint 0 is the wrist, keypoint 2 the middle finger knuckle.
const WRIST_KEYPOINT: usize = 0;
const MIDDLE_KNUCKLE_KEYPOINT: usize = 2;
const CROP_EXPANSION: f32 = 2.6;
const CROP_SHIFT: f32 = 0.5;

/// SSD feature maps of the palm model: (stride, anchors per cell).
const ANCHOR_LAYERS: &[(u32, usize)] = &[(8, 2), (16, 6)];

#[derive(Clone, Debug, PartialEq)]
pub struct PalmRegion {
    /// x1, y1, x2, y2 in frame pixels.
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

impl PalmRegion {
    /// Square, upright-rotated crop around the hand this palm belongs to.
    pub fn hand_crop(&self) -> CropTransform {
        let [x1, y1, x2, y2] = self.bbox;
        let (w, h) = (x2 - x1, y2 - y1);

        let angle = match (
            self.keypoints.get(WRIST_KEYPOINT),
            self.keypoints.get(MIDDLE_KNUCKLE_KEYPOINT),
        ) {
            (Some(wrist), Some(knuckle)) => {
                // Rotate so the wrist-to-knuckle direction points up.
                let dx = knuckle.0 - wrist.0;
                let dy = knuckle.1 - wrist.1;
                dy.atan2(dx) + FRAC_PI_2
            }
            _ => 0.0,
        };

        // The palm box only covers the palm; shift toward the fingers.
        let (sin, cos) = angle.sin_cos();
        let shift = -h * CROP_SHIFT;
        let center = (
            (x1 + x2) * 0.5 - shift * sin,
            (y1 + y2) * 0.5 + shift * cos,
        );

        CropTransform {
            center,
            side: w.max(h) * CROP_EXPANSION,
            angle,
            output_size: HANDPOSE_INPUT_SIZE,
        }
    }
}

pub struct PalmDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    score_threshold: f32,
}

impl PalmDetector {
    pub fn new(model_path: &Path, score_threshold: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: generate_anchors(PALM_INPUT_SIZE),
            score_threshold,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = letterbox_tensor(frame, PALM_INPUT_SIZE)?;
        let outputs = self
            .session
            .run(ort::inputs![Tensor::from_array(input)?])
            .context("failed to run palm detector session")?;

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

        decode_palms(
            &boxes,
            &scores,
            &self.anchors,
            &letterbox,
            self.score_threshold,
        )
    }
}

pub fn generate_anchors(input_size: u32) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    for &(stride, per_cell) in ANCHOR_LAYERS {
        let cells = input_size / stride;
        for y in 0..cells {
            for x in 0..cells {
                let center = [
                    (x as f32 + 0.5) / cells as f32,
                    (y as f32 + 0.5) / cells as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

/// Decodes raw SSD regressions into palm regions in frame pixels, highest
/// score first.
pub fn decode_palms(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    letterbox: &Letterbox,
    score_threshold: f32,
) -> Result<Vec<PalmRegion>> {
    if scores.len() < anchors.len() || boxes.len() < anchors.len() * BOX_FEATURES {
        return Err(anyhow!(
            "palm outputs too small for {} anchors: {} boxes, {} scores",
            anchors.len(),
            boxes.len(),
            scores.len()
        ));
    }

    let input = PALM_INPUT_SIZE as f32;
    // Normalized input coordinates to frame pixels.
    let to_frame = |nx: f32, ny: f32| -> (f32, f32) {
        (
            (nx * input - letterbox.pad_x) / letterbox.scale,
            (ny * input - letterbox.pad_y) / letterbox.scale,
        )
    };
    let max_x = letterbox.orig_w.saturating_sub(1) as f32;
    let max_y = letterbox.orig_h.saturating_sub(1) as f32;

    let mut candidates = Vec::new();
    for (idx, anchor) in anchors.iter().enumerate() {
        let score = sigmoid(scores[idx]);
        if score.is_nan() || score < score_threshold {
            continue;
        }

        let raw = &boxes[idx * BOX_FEATURES..(idx + 1) * BOX_FEATURES];
        let cx = raw[0] / input + anchor[0];
        let cy = raw[1] / input + anchor[1];
        let hw = raw[2] / input / 2.0;
        let hh = raw[3] / input / 2.0;
        if hw <= 0.0 || hh <= 0.0 {
            continue;
        }

        let (x1, y1) = to_frame(cx - hw, cy - hh);
        let (x2, y2) = to_frame(cx + hw, cy + hh);
        let keypoints = raw[4..]
            .chunks_exact(2)
            .map(|kp| to_frame(kp[0] / input + anchor[0], kp[1] / input + anchor[1]))
            .collect();

        candidates.push(PalmRegion {
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

    Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD, MAX_PALMS))
}

fn non_max_suppression(
    mut candidates: Vec<PalmRegion>,
    iou_threshold: f32,
    limit: usize,
) -> Vec<PalmRegion> {
    // NaN ranks last.
    let rank = |palm: &PalmRegion| {
        if palm.score.is_nan() {
            f32::NEG_INFINITY
        } else {
            palm.score
        }
    };
    candidates.sort_by(|a, b| rank(b).total_cmp(&rank(a)));

    let mut kept: Vec<PalmRegion> = Vec::new();
    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn square_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 192,
            orig_h: 192,
        }
    }

    fn region(bbox: [f32; 4], score: f32) -> PalmRegion {
        PalmRegion {
            bbox,
            keypoints: Vec::new(),
            score,
        }
    }

    #[test]
    fn anchor_grid_matches_palm_model() {
        let anchors = generate_anchors(192);
        assert_eq!(anchors.len(), 2016);
        assert_eq!(anchors[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[1152], [0.5 / 12.0, 0.5 / 12.0]);
    }

    #[test]
    fn decode_keeps_confident_anchor_only() {
        let anchors = vec![[0.5, 0.5], [0.25, 0.25]];
        let mut boxes = vec![0.0; 2 * BOX_FEATURES];
        boxes[2] = 48.0;
        boxes[3] = 48.0;
        let scores = vec![4.0, -4.0];

        let palms = decode_palms(&boxes, &scores, &anchors, &square_letterbox(), 0.5).unwrap();
        assert_eq!(palms.len(), 1);
        assert_eq!(palms[0].bbox, [72.0, 72.0, 120.0, 120.0]);
        assert_eq!(palms[0].keypoints.len(), PALM_KEYPOINTS);
        assert_eq!(palms[0].keypoints[0], (96.0, 96.0));
        assert!(palms[0].score > 0.98);
    }

    #[test]
    fn decode_undoes_letterbox_padding() {
        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 20.0,
            orig_w: 384,
            orig_h: 304,
        };
        let anchors = vec![[0.5, 0.5]];
        let mut boxes = vec![0.0; BOX_FEATURES];
        boxes[2] = 10.0;
        boxes[3] = 10.0;

        let palms = decode_palms(&boxes, &[5.0], &anchors, &letterbox, 0.5).unwrap();
        assert_eq!(palms[0].keypoints[0], (192.0, 152.0));
    }

    #[test]
    fn decode_rejects_short_outputs() {
        let anchors = generate_anchors(192);
        assert!(decode_palms(&[0.0; 10], &[0.0; 10], &anchors, &square_letterbox(), 0.5).is_err());
    }

    #[test]
    fn nan_scores_never_become_palms() {
        let anchors = generate_anchors(192);
        let mut boxes = vec![0.0; anchors.len() * BOX_FEATURES];
        for raw in boxes.chunks_exact_mut(BOX_FEATURES) {
            raw[2] = 20.0;
            raw[3] = 20.0;
        }
        let mut scores = vec![f32::NAN; anchors.len()];
        scores[100] = 3.0;

        let palms = decode_palms(&boxes, &scores, &anchors, &square_letterbox(), 0.5).unwrap();
        assert_eq!(palms.len(), 1);
        assert!(palms[0].score.is_finite());
    }

    #[test]
    fn nms_orders_nan_scores_last() {
        let kept = non_max_suppression(
            vec![
                region([0.0, 0.0, 10.0, 10.0], f32::NAN),
                region([20.0, 20.0, 30.0, 30.0], 0.8),
                region([40.0, 40.0, 50.0, 50.0], f32::NAN),
            ],
            0.3,
            1,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.8);
    }

    #[test]
    fn nms_drops_overlapping_boxes() {
        let kept = non_max_suppression(
            vec![
                region([0.0, 0.0, 10.0, 10.0], 0.7),
                region([1.0, 1.0, 11.0, 11.0], 0.9),
                region([50.0, 50.0, 60.0, 60.0], 0.6),
            ],
            0.3,
            4,
        );
        let scores: Vec<f32> = kept.iter().map(|r| r.score).collect();
        assert_eq!(scores, [0.9, 0.6]);
    }

    #[test]
    fn upright_palm_crop_shifts_toward_fingers() {
        let palm = PalmRegion {
            bbox: [40.0, 40.0, 60.0, 60.0],
            keypoints: vec![(50.0, 60.0), (0.0, 0.0), (50.0, 40.0)],
            score: 0.9,
        };
        let crop = palm.hand_crop();
        assert!(crop.angle.abs() < 1e-5);
        assert!((crop.center.0 - 50.0).abs() < 1e-4);
        assert!((crop.center.1 - 40.0).abs() < 1e-4);
        assert!((crop.side - 52.0).abs() < 1e-4);
    }
}
