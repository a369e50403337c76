use std::{fmt, time::Instant};

use thiserror::Error;

/// Number of keypoints every hand landmark set carries.
pub const NUM_LANDMARKS: usize = 21;

/// One camera sample, tightly packed RGB8.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgb,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(3)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("hand landmark set has {got} points, expected {expected}")]
    LandmarkCount { got: usize, expected: usize },
    #[error("feature vector has {got} values, expected {expected}")]
    FeatureLength { got: usize, expected: usize },
}

/// Exactly [`NUM_LANDMARKS`] image-relative points for one detected hand.
#[derive(Clone, Debug, PartialEq)]
pub struct HandLandmarkSet {
    points: Vec<(f32, f32)>,
}

impl HandLandmarkSet {
    pub fn new(points: Vec<(f32, f32)>) -> Result<Self, ShapeError> {
        if points.len() != NUM_LANDMARKS {
            return Err(ShapeError::LandmarkCount {
                got: points.len(),
                expected: NUM_LANDMARKS,
            });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// Min/max of the set scaled to frame pixels, truncated toward zero.
    pub fn bounding_box(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let (min_x, min_y, max_x, max_y) = self.points.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |acc, &(x, y)| (acc.0.min(x), acc.1.min(y), acc.2.max(x), acc.3.max(y)),
        );
        let w = frame_width as f32;
        let h = frame_height as f32;
        BoundingBox {
            x1: (min_x * w) as i32,
            y1: (min_y * h) as i32,
            x2: (max_x * w) as i32,
            y2: (max_y * h) as i32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Resolved output of the label lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassLabel {
    Sign(&'static str),
    /// Classifier ran (or should have) but produced nothing usable.
    Unknown,
    /// No hand was visible in the attempted frame.
    NoPrediction,
}

impl ClassLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Sign(label) => label,
            ClassLabel::Unknown => "Unknown",
            ClassLabel::NoPrediction => "No Prediction",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandReading {
    pub landmarks: HandLandmarkSet,
    pub label: ClassLabel,
    pub bbox: BoundingBox,
}

/// Outcome of one detection attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum Recognition {
    NoHand,
    /// Never empty; hands keep the detector's reported order.
    Detected { hands: Vec<HandReading> },
}

impl Recognition {
    pub fn from_hands(hands: Vec<HandReading>) -> Self {
        if hands.is_empty() {
            Recognition::NoHand
        } else {
            Recognition::Detected { hands }
        }
    }

    /// The single current label: the last hand in detector order wins.
    pub fn label(&self) -> ClassLabel {
        match self {
            Recognition::NoHand => ClassLabel::NoPrediction,
            Recognition::Detected { hands } => hands
                .last()
                .map(|hand| hand.label)
                .unwrap_or(ClassLabel::NoPrediction),
        }
    }

    pub fn hands(&self) -> &[HandReading] {
        match self {
            Recognition::NoHand => &[],
            Recognition::Detected { hands } => hands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_hand(min: f32, max: f32) -> HandLandmarkSet {
        let mut points = vec![(min, min), (max, max)];
        points.resize(NUM_LANDMARKS, ((min + max) / 2.0, (min + max) / 2.0));
        HandLandmarkSet::new(points).unwrap()
    }

    #[test]
    fn landmark_set_rejects_wrong_lengths() {
        for len in [0, 1, 20, 22, 42] {
            let err = HandLandmarkSet::new(vec![(0.5, 0.5); len]).unwrap_err();
            assert_eq!(
                err,
                ShapeError::LandmarkCount {
                    got: len,
                    expected: NUM_LANDMARKS
                }
            );
        }
        assert!(HandLandmarkSet::new(vec![(0.5, 0.5); NUM_LANDMARKS]).is_ok());
    }

    #[test]
    fn bounding_box_scales_extremes_to_pixels() {
        let hand = square_hand(0.25, 0.75);
        let bbox = hand.bounding_box(640, 480);
        assert_eq!(
            bbox,
            BoundingBox {
                x1: 160,
                y1: 120,
                x2: 480,
                y2: 360
            }
        );
    }

    #[test]
    fn last_hand_provides_current_label() {
        let first = HandReading {
            landmarks: square_hand(0.1, 0.2),
            label: ClassLabel::Sign("A"),
            bbox: BoundingBox {
                x1: 0,
                y1: 0,
                x2: 1,
                y2: 1,
            },
        };
        let second = HandReading {
            label: ClassLabel::Sign("B"),
            ..first.clone()
        };
        let recognition = Recognition::from_hands(vec![first, second]);
        assert_eq!(recognition.label(), ClassLabel::Sign("B"));
        assert_eq!(recognition.hands().len(), 2);
    }

    #[test]
    fn empty_hand_list_is_no_hand() {
        let recognition = Recognition::from_hands(Vec::new());
        assert_eq!(recognition, Recognition::NoHand);
        assert_eq!(recognition.label().to_string(), "No Prediction");
    }
}
