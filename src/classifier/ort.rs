use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::Array3;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{SignClassifier, softmax};
use crate::features::{FEATURE_WIDTH, FeatureTensor};

#[derive(Clone, Debug)]
pub struct OrtClassifierConfig {
    pub intra_threads: usize,
    /// Set when the model emits logits rather than probabilities.
    pub apply_softmax: bool,
}

impl Default for OrtClassifierConfig {
    fn default() -> Self {
        Self {
            intra_threads: 2,
            apply_softmax: true,
        }
    }
}

/// ONNX Runtime model taking `[1, window, 780]` and returning one score per
/// class.
pub struct OrtSignClassifier {
    session: Session,
    cfg: OrtClassifierConfig,
    num_classes: usize,
}

impl OrtSignClassifier {
    /// Loads the model and runs it once on an all-zero window to learn the
    /// output width.
    pub fn new(model_path: &Path, window_len: usize, cfg: OrtClassifierConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load sign classifier from {}", model_path.display())
            })?;

        let mut classifier = Self {
            session,
            cfg,
            num_classes: 0,
        };
        let warmup = vec![0.0; window_len * FEATURE_WIDTH];
        let scores = classifier
            .run(window_len, warmup)
            .context("sign classifier warmup failed")?;
        if scores.is_empty() {
            return Err(anyhow!("sign classifier produced an empty output"));
        }
        classifier.num_classes = scores.len();

        log::info!(
            "sign classifier ready: {} classes, window {} from {}",
            classifier.num_classes,
            window_len,
            model_path.display()
        );
        Ok(classifier)
    }

    fn run(&mut self, frames: usize, data: Vec<f32>) -> Result<Vec<f32>> {
        let input = Array3::from_shape_vec((1, frames, FEATURE_WIDTH), data)
            .map_err(|err| anyhow!("failed to build classifier input: {err}"))?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run sign classifier")?;

        if outputs.len() < 1 {
            return Err(anyhow!("sign classifier returned no outputs"));
        }
        let scores = outputs[0].try_extract_array::<f32>()?;
        let scores: Vec<f32> = scores.iter().copied().collect();

        Ok(if self.cfg.apply_softmax {
            softmax(&scores)
        } else {
            scores
        })
    }
}

impl SignClassifier for OrtSignClassifier {
    fn classify(&mut self, tensor: &FeatureTensor) -> Result<Vec<f32>> {
        let probabilities = self.run(tensor.frames(), tensor.as_slice().to_vec())?;
        if probabilities.len() != self.num_classes {
            return Err(anyhow!(
                "classifier output width changed: got {}, expected {}",
                probabilities.len(),
                self.num_classes
            ));
        }
        Ok(probabilities)
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }
}
