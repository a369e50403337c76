use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    DetectorConfig, LandmarkDetector,
    palm::{PalmDetector, PalmRegion, hand_crop},
    preprocess::rotated_crop,
};
use crate::types::{Frame, NUM_LANDMARKS};

const HANDPOSE_INPUT_SIZE: u32 = 224;

pub(super) fn open_session(model_path: &Path, what: &str) -> Result<Session> {
    if !model_path.exists() {
        bail!("{what} model not found at {}", model_path.display());
    }
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load {what} from {}", model_path.display()))
}

/// Two-stage detector: palm boxes first, then 21 landmarks per palm crop.
pub struct OrtHandDetector {
    palm: PalmDetector,
    handpose: Session,
    config: DetectorConfig,
}

impl OrtHandDetector {
    pub fn load(palm_model: &Path, handpose_model: &Path, config: DetectorConfig) -> Result<Self> {
        let palm = PalmDetector::load(palm_model, config.min_detection_confidence)?;
        let handpose = open_session(handpose_model, "handpose estimator")?;
        log::info!(
            "hand detector ready using palm model {} and handpose model {}",
            palm_model.display(),
            handpose_model.display()
        );
        Ok(Self {
            palm,
            handpose,
            config,
        })
    }

    /// Landmarks in frame pixels, or `None` when the crop holds no confident hand.
    fn landmarks_for(&mut self, frame: &Frame, palm: &PalmRegion) -> Result<Option<Vec<(f32, f32)>>> {
        let (center, side, angle) = hand_crop(palm);
        let (input, transform) = rotated_crop(frame, center, side, angle, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose estimator")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "handpose estimator returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let presence = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);
        if presence < self.config.min_tracking_confidence {
            log::trace!("dropping palm crop with hand presence {presence:.2}");
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let coords: Vec<f32> = coords.iter().copied().collect();
        Ok(Some(decode_landmarks(&coords, |x, y| transform.project(x, y))?))
    }
}

impl LandmarkDetector for OrtHandDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Vec<(f32, f32)>>> {
        let palms = self.palm.detect(frame)?;
        let width = frame.width as f32;
        let height = frame.height as f32;

        let mut hands = Vec::new();
        for palm in palms.iter().take(self.config.max_hands) {
            match self.landmarks_for(frame, palm) {
                Ok(Some(points)) => hands.push(
                    points
                        .into_iter()
                        .map(|(x, y)| (x / width, y / height))
                        .collect(),
                ),
                Ok(None) => {}
                Err(err) => log::warn!("handpose estimation failed for palm: {err:#}"),
            }
        }
        Ok(hands)
    }
}

/// Handpose output is `x, y, z` per landmark in crop pixels; `z` is unused.
fn decode_landmarks(
    coords: &[f32],
    project: impl Fn(f32, f32) -> (f32, f32),
) -> Result<Vec<(f32, f32)>> {
    if coords.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "handpose output has {} values, expected {}",
            coords.len(),
            NUM_LANDMARKS * 3
        ));
    }
    Ok(coords
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|xyz| project(xyz[0], xyz[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmarks_are_projected_per_point() {
        let coords: Vec<f32> = (0..NUM_LANDMARKS * 3).map(|v| v as f32).collect();
        let points = decode_landmarks(&coords, |x, y| (x + 1.0, y * 2.0)).unwrap();
        assert_eq!(points.len(), NUM_LANDMARKS);
        assert_eq!(points[0], (1.0, 2.0));
        assert_eq!(points[1], (4.0, 8.0));
    }

    #[test]
    fn short_handpose_output_is_an_error() {
        assert!(decode_landmarks(&[0.0; 10], |x, y| (x, y)).is_err());
    }

    #[test]
    fn missing_models_fail_to_load() {
        let err = OrtHandDetector::load(
            Path::new("missing/palm.onnx"),
            Path::new("missing/handpose.onnx"),
            DetectorConfig::default(),
        )
        .err()
        .expect("load should fail");
        assert!(err.to_string().contains("palm detector model not found"));
    }
}
