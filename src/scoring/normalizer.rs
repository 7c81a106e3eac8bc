//! Score normalization — raw classifier values to a probability
//! distribution and a single sensitivity score.

use std::collections::BTreeMap;

use tracing::debug;

use super::{ClassifierHead, HeadType, RawScoreOutput};

/// Label name substrings that mark a label as the sensitive one.
const SENSITIVE_KEYWORDS: [&str; 5] = [
    "sensitive",
    "restricted",
    "confidential",
    "positive",
    "toxic",
];

/// Raw values are clamped to this magnitude before any exponentials.
const LOGIT_LIMIT: f64 = 1.0e6;

/// Distribution keys for a binary head.
pub const NON_SENSITIVE_LABEL: &str = "non_sensitive";
pub const SENSITIVE_LABEL: &str = "sensitive";

/// Result of normalizing one raw output.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub distribution: BTreeMap<String, f64>,
    pub sensitivity_score: f64,
    pub label: String,
}

/// Resolve which output index carries the "sensitive" probability.
///
/// Precedence: explicit override (label name, then numeric index),
/// keyword heuristic, label cardinality, none.
pub fn resolve_sensitive_index(labels: &[String], override_label: Option<&str>) -> Option<usize> {
    if let Some(target) = override_label.map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(i) = labels.iter().position(|l| l.eq_ignore_ascii_case(target)) {
            return Some(i);
        }
        if let Ok(i) = target.parse::<usize>() {
            return Some(i);
        }
    }

    if let Some(i) = labels.iter().position(|l| {
        let lower = l.to_lowercase();
        SENSITIVE_KEYWORDS.iter().any(|k| lower.contains(k))
    }) {
        return Some(i);
    }

    match labels.len() {
        2 => Some(1),
        1 => Some(0),
        _ => None,
    }
}

/// Normalizer for one classifier head, with the sensitive index resolved once.
#[derive(Debug, Clone)]
pub struct ScoreNormalizer {
    head: ClassifierHead,
    sensitive_index: Option<usize>,
}

impl ScoreNormalizer {
    pub fn new(head: ClassifierHead, override_label: Option<&str>) -> Self {
        let sensitive_index = match &head {
            // A single logit is P(sensitive) by construction.
            ClassifierHead::Binary => Some(0),
            ClassifierHead::MultiClass { labels } | ClassifierHead::MultiLabel { labels } => {
                resolve_sensitive_index(labels, override_label)
            }
        };
        debug!(
            head_type = %head.head_type(),
            sensitive_index = ?sensitive_index,
            "Score normalizer configured"
        );
        Self {
            head,
            sensitive_index,
        }
    }

    pub fn head(&self) -> &ClassifierHead {
        &self.head
    }

    pub fn sensitive_index(&self) -> Option<usize> {
        self.sensitive_index
    }

    /// Wrap raw model values with this head's type and label names.
    pub fn raw_output(&self, values: Vec<f64>) -> RawScoreOutput {
        RawScoreOutput {
            head_type: self.head.head_type(),
            values,
            label_names: self.head.labels().to_vec(),
        }
    }

    /// Normalize a raw output.
    pub fn normalize(&self, raw: &RawScoreOutput) -> Normalized {
        let values: Vec<f64> = raw.values.iter().copied().map(sanitize).collect();

        let single_logit = raw.head_type != HeadType::MultiLabel && values.len() == 1;
        if raw.head_type == HeadType::Binary || single_logit {
            return normalize_binary(values.first().copied().unwrap_or(0.0));
        }

        let probs = match raw.head_type {
            HeadType::MultiLabel => values.into_iter().map(logistic).collect(),
            _ => softmax(&values),
        };
        self.summarize(&probs, &raw.label_names)
    }

    fn summarize(&self, probs: &[f64], names: &[String]) -> Normalized {
        let distribution = probs
            .iter()
            .enumerate()
            .map(|(i, p)| (label_name(names, i), *p))
            .collect();

        let top = argmax(probs);
        let sensitivity_score = match self.sensitive_index {
            Some(i) if i < probs.len() => probs[i],
            _ => top.map_or(0.0, |i| probs[i]),
        };

        Normalized {
            distribution,
            sensitivity_score,
            label: label_name(names, top.unwrap_or(0)),
        }
    }
}

fn normalize_binary(logit: f64) -> Normalized {
    let p = logistic(logit);
    let mut distribution = BTreeMap::new();
    distribution.insert(NON_SENSITIVE_LABEL.to_string(), 1.0 - p);
    distribution.insert(SENSITIVE_LABEL.to_string(), p);
    let label = if p >= 0.5 {
        SENSITIVE_LABEL
    } else {
        NON_SENSITIVE_LABEL
    };
    Normalized {
        distribution,
        sensitivity_score: p,
        label: label.to_string(),
    }
}

fn label_name(names: &[String], i: usize) -> String {
    names
        .get(i)
        .cloned()
        .unwrap_or_else(|| format!("LABEL_{i}"))
}

fn sanitize(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-LOGIT_LIMIT, LOGIT_LIMIT)
    }
}

/// Logistic map, stable for large magnitudes.
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Softmax with the max subtracted first.
pub fn softmax(values: &[f64]) -> Vec<f64> {
    let Some(max) = values.iter().copied().reduce(f64::max) else {
        return Vec::new();
    };
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the first maximum.
fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
