//! In-process classifier backed by a [`ScoringModel`].
//!
//! Also the engine behind the classifier HTTP API.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ClassificationResult, Classifier, ClassifyRequest, ClassifyResponse};
use crate::error::{ClassifierError, ModelError};
use crate::policy::PolicyThresholds;
use crate::scoring::{ScoreNormalizer, ScoringModel};

#[derive(Clone)]
pub struct LocalClassifier {
    model: Arc<dyn ScoringModel>,
    normalizer: Arc<ScoreNormalizer>,
    thresholds: PolicyThresholds,
}

impl LocalClassifier {
    /// Resolve the model's sensitive index once and bind the thresholds.
    pub fn new(
        model: Arc<dyn ScoringModel>,
        sensitive_label: Option<&str>,
        thresholds: PolicyThresholds,
    ) -> Self {
        let normalizer = ScoreNormalizer::new(model.head().clone(), sensitive_label);
        Self {
            model,
            normalizer: Arc::new(normalizer),
            thresholds,
        }
    }

    pub fn model(&self) -> &dyn ScoringModel {
        self.model.as_ref()
    }

    pub fn normalizer(&self) -> &ScoreNormalizer {
        &self.normalizer
    }

    pub fn thresholds(&self) -> &PolicyThresholds {
        &self.thresholds
    }

    /// Score a request and build the wire response.
    pub fn evaluate(&self, request: &ClassifyRequest) -> Result<ClassifyResponse, ModelError> {
        let values = self.model.score(&request.model_input())?;
        let expected = self.model.head().num_outputs();
        if values.len() != expected {
            return Err(ModelError::ShapeMismatch {
                expected,
                got: values.len(),
            });
        }

        let normalized = self.normalizer.normalize(&self.normalizer.raw_output(values));
        let action = self.thresholds.decide(normalized.sensitivity_score);

        let debug = BTreeMap::from([
            (
                "head_type".to_string(),
                self.model.head().head_type().to_string(),
            ),
            (
                "sensitive_idx".to_string(),
                self.normalizer
                    .sensitive_index()
                    .map_or_else(|| "None".to_string(), |i| i.to_string()),
            ),
        ]);

        Ok(ClassifyResponse {
            label: normalized.label,
            score: normalized.sensitivity_score,
            scores: normalized.distribution,
            action: Some(action.wire_name().to_string()),
            rationale: None,
            model_version: Some(self.model.version().to_string()),
            policy_version: Some(self.thresholds.version()),
            debug: Some(debug),
        })
    }
}

#[async_trait]
impl Classifier for LocalClassifier {
    fn name(&self) -> &str {
        "local"
    }

    async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        let this = self.clone();
        let request = request.clone();
        let response = tokio::task::spawn_blocking(move || this.evaluate(&request))
            .await
            .map_err(|e| ModelError::Inference(format!("scoring task failed: {e}")))??;
        response.into_result(&self.thresholds)
    }
}
