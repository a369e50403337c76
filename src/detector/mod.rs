//! Hand landmark detection.
//!
//! The pipeline only depends on [`LandmarkDetector`]; the ORT implementation
//! chains a palm detector with a per-palm handpose landmark model.

mod ort;
mod palm;
mod preprocess;

use anyhow::Result;

use crate::types::Frame;

pub use self::ort::OrtHandDetector;

pub trait LandmarkDetector: Send + 'static {
    /// Hands in the detector's reported order, each a list of image-relative
    /// `(x, y)` points in `[0, 1]`. Lists are validated by the caller.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Vec<(f32, f32)>>>;
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Palm score threshold.
    pub min_detection_confidence: f32,
    /// Handpose presence threshold for a palm crop to count as a hand.
    pub min_tracking_confidence: f32,
    pub max_hands: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.8,
            min_tracking_confidence: 0.8,
            max_hands: 2,
        }
    }
}
