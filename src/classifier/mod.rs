//! Classifier contract and client implementations.
//!
//! - [`HttpClassifier`]: calls the external classifier service.
//! - [`LocalClassifier`]: runs a [`ScoringModel`](crate::scoring::ScoringModel) in-process.

pub mod http;
pub mod local;

pub use http::HttpClassifier;
pub use local::LocalClassifier;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::extract::{Attachment, ParsedMessage};
use crate::policy::{Action, PolicyThresholds};

// ── Wire types ──────────────────────────────────────────────────────

/// Attachment metadata as sent to the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

impl From<&Attachment> for AttachmentMeta {
    fn from(a: &Attachment) -> Self {
        Self {
            filename: a.filename.clone(),
            size: a.size,
            mimetype: Some(a.mimetype.clone()),
        }
    }
}

/// Body of `POST /classify`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    #[serde(default)]
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
}

impl ClassifyRequest {
    /// Build a request from a parsed message, overlaying `overrides` on its headers.
    pub fn from_message(message: &ParsedMessage, overrides: BTreeMap<String, String>) -> Self {
        let mut headers = message.headers.clone();
        headers.extend(overrides);
        Self {
            subject: message.subject.clone(),
            body: message.body_text.clone(),
            headers,
            attachments: message.attachments.iter().map(AttachmentMeta::from).collect(),
        }
    }

    /// Flatten the request into the text a scoring model consumes.
    pub fn model_input(&self) -> String {
        let headers = self
            .headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(" ");
        let attachments = self
            .attachments
            .iter()
            .filter(|a| !a.filename.is_empty())
            .map(|a| a.filename.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "[HEADERS] {headers}\n[SUBJECT] {}\n[BODY]\n{}\n[ATTACH] {attachments}\n",
            self.subject, self.body
        )
    }
}

/// Body returned by `POST /classify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub label: String,
    /// Sensitive probability.
    pub score: f64,
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub rationale: Option<Vec<String>>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub policy_version: Option<String>,
    #[serde(default)]
    pub debug: Option<BTreeMap<String, String>>,
}

impl ClassifyResponse {
    /// Validate the response and settle the action.
    ///
    /// An embedded action wins; without one the local thresholds decide.
    pub fn into_result(
        self,
        thresholds: &PolicyThresholds,
    ) -> Result<ClassificationResult, ClassifierError> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(ClassifierError::InvalidResponse {
                reason: format!("score {} outside [0, 1]", self.score),
            });
        }

        let action = match self.action.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => {
                Action::parse(s).ok_or_else(|| ClassifierError::InvalidResponse {
                    reason: format!("unknown action {s:?}"),
                })?
            }
            _ => thresholds.decide(self.score),
        };

        Ok(ClassificationResult {
            label: self.label,
            sensitivity_score: self.score,
            score_distribution: self.scores,
            action,
            model_version: self.model_version,
            policy_version: self
                .policy_version
                .unwrap_or_else(|| thresholds.version()),
        })
    }
}

// ── Domain result ───────────────────────────────────────────────────

/// Outcome of classifying one message. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    /// Always within `[0, 1]`.
    pub sensitivity_score: f64,
    pub score_distribution: BTreeMap<String, f64>,
    pub action: Action,
    pub model_version: Option<String>,
    pub policy_version: String,
}

// ── Trait ───────────────────────────────────────────────────────────

/// A classifier the session handler can call.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Score one message.
    async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<ClassificationResult, ClassifierError>;
}
