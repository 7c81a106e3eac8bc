//! Classifier head description and raw model output.
//!
//! The scoring model itself is external. Anything implementing
//! [`ScoringModel`] can be served through the classifier API or used
//! in-process via `LocalClassifier`.

pub mod normalizer;

pub use normalizer::{Normalized, ScoreNormalizer, resolve_sensitive_index};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Output shape of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadType {
    /// Single logit, P(sensitive) after the logistic map.
    Binary,
    /// One logit per class, normalized with softmax.
    MultiClass,
    /// One independent logit per label.
    MultiLabel,
}

impl std::fmt::Display for HeadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Binary => "binary",
            Self::MultiClass => "multi_class",
            Self::MultiLabel => "multi_label",
        };
        write!(f, "{s}")
    }
}

/// A classifier head together with its label space, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "head_type", rename_all = "snake_case")]
pub enum ClassifierHead {
    Binary,
    MultiClass { labels: Vec<String> },
    MultiLabel { labels: Vec<String> },
}

impl ClassifierHead {
    pub fn head_type(&self) -> HeadType {
        match self {
            Self::Binary => HeadType::Binary,
            Self::MultiClass { .. } => HeadType::MultiClass,
            Self::MultiLabel { .. } => HeadType::MultiLabel,
        }
    }

    /// Label names in index order. A binary head has a single implicit label.
    pub fn labels(&self) -> &[String] {
        match self {
            Self::Binary => &[],
            Self::MultiClass { labels } | Self::MultiLabel { labels } => labels,
        }
    }

    /// Number of raw values the head produces.
    pub fn num_outputs(&self) -> usize {
        match self {
            Self::Binary => 1,
            Self::MultiClass { labels } | Self::MultiLabel { labels } => labels.len(),
        }
    }
}

/// Raw classifier output before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScoreOutput {
    pub head_type: HeadType,
    pub values: Vec<f64>,
    pub label_names: Vec<String>,
}

/// An opaque scoring model: text in, raw logits out.
pub trait ScoringModel: Send + Sync {
    /// Head and label space of this model.
    fn head(&self) -> &ClassifierHead;

    /// Identifier reported as `model_version`.
    fn version(&self) -> &str;

    /// Produce one raw value per head output for the given input text.
    fn score(&self, input: &str) -> Result<Vec<f64>, ModelError>;
}
