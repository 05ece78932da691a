mod ort;

use std::{fs, path::Path};

use anyhow::{Context, Result};

pub use self::ort::{OrtClassifierConfig, OrtSignClassifier};
use crate::features::FeatureTensor;

/// External sign classifier: one probability per class for a window tensor.
pub trait SignClassifier: Send + 'static {
    fn classify(&mut self, tensor: &FeatureTensor) -> Result<Vec<f32>>;

    /// Output width, when known up front. Checked against the label list at
    /// startup.
    fn num_classes(&self) -> Option<usize> {
        None
    }
}

impl<F> SignClassifier for F
where
    F: FnMut(&FeatureTensor) -> Result<Vec<f32>> + Send + 'static,
{
    fn classify(&mut self, tensor: &FeatureTensor) -> Result<Vec<f32>> {
        self(tensor)
    }
}

/// Ordered class names, index-aligned with the classifier output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// One label per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read labels from {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }
}

/// Index and value of the largest probability.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}
