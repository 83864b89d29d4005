pub mod common;
mod ort;
pub mod palm;

use crate::types::{Frame, HandDetection};

pub use self::ort::OrtLandmarkSource;

/// Pretrained hand-pose model boundary.
pub trait LandmarkSource: Send + 'static {
    /// Detects at most one hand in `frame`; an empty list means no hand.
    fn estimate_hands(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandDetection>>;
}

