//! Classification engine seam
//!
//! The session owns one boxed engine at a time and builds it through an
//! [`EngineLoader`]. Engines are synchronous; the live-stream path runs
//! them on the blocking pool.

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::config::ClassifierOptions;
use crate::error::VisionError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[cfg(feature = "onnx")]
pub use onnx::{OnnxEngine, OnnxLoader};

/// One scored label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Index into the model's label table
    pub index: usize,
    pub label: String,
    pub score: f32,
}

impl Category {
    pub fn new(index: usize, label: impl Into<String>, score: f32) -> Self {
        Self {
            index,
            label: label.into(),
            score,
        }
    }
}

/// A loaded model that scores images
#[cfg_attr(test, mockall::automock)]
pub trait ClassificationEngine: Send {
    /// Score every label for one upright image. Filtering and ranking are
    /// done by the caller.
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Category>, VisionError>;

    /// Free native resources. Called exactly once before the engine is dropped.
    fn close(&mut self) {}
}

/// Builds engines from session options
#[cfg_attr(test, mockall::automock)]
pub trait EngineLoader: Send + Sync {
    fn load(&self, options: &ClassifierOptions)
        -> Result<Box<dyn ClassificationEngine>, VisionError>;
}

impl<F> EngineLoader for F
where
    F: Fn(&ClassifierOptions) -> Result<Box<dyn ClassificationEngine>, VisionError> + Send + Sync,
{
    fn load(
        &self,
        options: &ClassifierOptions,
    ) -> Result<Box<dyn ClassificationEngine>, VisionError> {
        self(options)
    }
}

/// Numerically stable softmax; non-finite inputs score zero
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);

    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }

    let exps: Vec<f32> = logits
        .iter()
        .map(|v| if v.is_finite() { (v - max).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Label for an output index, falling back to a synthetic name
pub fn label_for(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_softmax_non_finite() {
        let probs = softmax(&[f32::NAN, 0.0]);
        assert_eq!(probs[0], 0.0);
        assert!((probs[1] - 1.0).abs() < 1e-5);
        assert_eq!(softmax(&[f32::NAN]), vec![0.0]);
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_label_for() {
        let labels = vec!["cat".to_string()];
        assert_eq!(label_for(&labels, 0), "cat");
        assert_eq!(label_for(&labels, 4), "class_4");
    }

    #[test]
    fn test_closure_loader() {
        let loader = |_: &ClassifierOptions| -> Result<Box<dyn ClassificationEngine>, VisionError> {
            Err(VisionError::Model("missing".to_string()))
        };
        let result = EngineLoader::load(&loader, &ClassifierOptions::default());
        assert!(matches!(result, Err(VisionError::Model(_))));
    }
}
