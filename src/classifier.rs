use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use ndarray::Array2;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::pipeline::features::{FEATURE_LEN, FeatureVector};

/// Feature vector in, class id out. Loaded once and never retrained.
pub trait GestureClassifier: Send + 'static {
    fn predict(&mut self, features: &FeatureVector) -> Result<i64>;
}

/// Sign classifier exported to ONNX. Exports that emit an integer label
/// tensor are read directly; score or logit outputs are reduced with argmax.
pub struct OnnxClassifier {
    session: Session,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            bail!(
                "sign classifier model not found at {}",
                model_path.display()
            );
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "failed to load sign classifier from {}",
                    model_path.display()
                )
            })?;

        log::info!("loaded sign classifier from {}", model_path.display());
        Ok(Self { session })
    }
}

impl GestureClassifier for OnnxClassifier {
    fn predict(&mut self, features: &FeatureVector) -> Result<i64> {
        let input = Array2::from_shape_vec((1, FEATURE_LEN), features.as_slice().to_vec())
            .map_err(|err| anyhow!("failed to shape classifier input: {err}"))?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run sign classifier")?;

        if outputs.len() < 1 {
            return Err(anyhow!("sign classifier returned no outputs"));
        }

        if let Ok(labels) = outputs[0].try_extract_array::<i64>() {
            return labels
                .iter()
                .next()
                .copied()
                .ok_or_else(|| anyhow!("sign classifier returned an empty label tensor"));
        }

        let scores = outputs[0].try_extract_array::<f32>()?;
        argmax(scores.iter().copied())
            .map(|idx| idx as i64)
            .ok_or_else(|| anyhow!("sign classifier returned an empty score tensor"))
    }
}

fn argmax(values: impl Iterator<Item = f32>) -> Option<usize> {
    values
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
}
