use crate::types::{NUM_LANDMARKS, ShapeError};

pub const FEATURE_LEN: usize = NUM_LANDMARKS * 2;

/// Classifier input: `x0, y0, x1, y1, ...` offset by the hand's own minimum x/y.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector([f32; FEATURE_LEN]);

impl FeatureVector {
    /// Accepts a flat slice only when it has exactly [`FEATURE_LEN`] values.
    pub fn from_slice(values: &[f32]) -> Result<Self, ShapeError> {
        let array: [f32; FEATURE_LEN] =
            values.try_into().map_err(|_| ShapeError::FeatureLength {
                got: values.len(),
                expected: FEATURE_LEN,
            })?;
        Ok(Self(array))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Translation-normalizes one hand. No rotation or scale normalization is
/// applied, the classifier was trained on raw offsets.
pub fn normalize(points: &[(f32, f32)]) -> Result<FeatureVector, ShapeError> {
    if points.len() != NUM_LANDMARKS {
        return Err(ShapeError::LandmarkCount {
            got: points.len(),
            expected: NUM_LANDMARKS,
        });
    }

    let (min_x, min_y) = points
        .iter()
        .fold((f32::MAX, f32::MAX), |acc, &(x, y)| (acc.0.min(x), acc.1.min(y)));

    let values: Vec<f32> = points
        .iter()
        .flat_map(|&(x, y)| [x - min_x, y - min_y])
        .collect();
    FeatureVector::from_slice(&values)
}
