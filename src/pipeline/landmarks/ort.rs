use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    LandmarkSource,
    common::{self, HANDPOSE_INPUT_SIZE},
    palm::PalmDetector,
};
use crate::{
    config::DetectionSettings,
    types::{Frame, HandDetection},
};

/// Palm detection followed by landmark regression on the best palm crop.
pub struct OrtLandmarkSource {
    handpose: Session,
    palm_detector: PalmDetector,
    confidence_threshold: f32,
}

impl OrtLandmarkSource {
    pub fn new(
        handpose_model_path: &Path,
        palm_model_path: &Path,
        settings: &DetectionSettings,
    ) -> Result<Self> {
        let handpose = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(handpose_model_path)
            .with_context(|| {
                format!(
                    "failed to load handpose model from {}",
                    handpose_model_path.display()
                )
            })?;
        let palm_detector = PalmDetector::new(palm_model_path, settings.palm_score_threshold)?;

        log::info!(
            "landmark source ready using {} and palm detector {}",
            handpose_model_path.display(),
            palm_model_path.display()
        );

        Ok(Self {
            handpose,
            palm_detector,
            confidence_threshold: settings.hand_confidence_threshold,
        })
    }
}

impl LandmarkSource for OrtLandmarkSource {
    fn estimate_hands(&mut self, frame: &Frame) -> Result<Vec<HandDetection>> {
        let palms = self.palm_detector.detect(frame)?;
        // Sorted by score, so the first palm is the primary hand.
        let Some(palm) = palms.first() else {
            return Ok(Vec::new());
        };

        let crop = palm.hand_crop();
        debug_assert_eq!(crop.output_size, HANDPOSE_INPUT_SIZE);
        let input = common::rotated_crop_tensor(frame, &crop)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_landmarks(&flattened)?;

        let first_value = |idx: usize| -> f32 {
            if outputs.len() > idx {
                outputs[idx]
                    .try_extract_array::<f32>()
                    .ok()
                    .and_then(|arr| arr.iter().next().copied())
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        };
        let confidence = first_value(1).clamp(0.0, 1.0);
        let handedness = first_value(2);

        if confidence < self.confidence_threshold {
            log::debug!(
                "hand confidence {confidence:.2} below {:.2}, palm score {:.2}",
                self.confidence_threshold,
                palm.score
            );
            return Ok(Vec::new());
        }

        let projected = crop.project(&landmarks);
        if projected.iter().flatten().any(|value| !value.is_finite()) {
            log::warn!("handpose model produced non-finite landmarks, dropping detection");
            return Ok(Vec::new());
        }
        Ok(HandDetection::new(projected, confidence, handedness)
            .into_iter()
            .collect())
    }
}
