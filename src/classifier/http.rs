//! HTTP client for the external classifier service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{ClassificationResult, Classifier, ClassifyRequest, ClassifyResponse};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::policy::PolicyThresholds;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Classifier reached over HTTP. One request per message, no retries.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    timeout: Duration,
    thresholds: PolicyThresholds,
}

impl HttpClassifier {
    pub fn new(
        config: &ClassifierConfig,
        thresholds: PolicyThresholds,
    ) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifierError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/classify", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            thresholds,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> ClassifierError {
        if e.is_timeout() {
            ClassifierError::Timeout {
                timeout: self.timeout,
            }
        } else {
            ClassifierError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClassifierError::AuthRejected);
        }
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
            });
        }

        let body: ClassifyResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout {
                    timeout: self.timeout,
                }
            } else {
                ClassifierError::InvalidResponse {
                    reason: e.to_string(),
                }
            }
        })?;

        debug!(
            endpoint = %self.endpoint,
            label = %body.label,
            score = body.score,
            "Classifier responded"
        );

        body.into_result(&self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> ClassifierConfig {
        ClassifierConfig {
            api_url: url.to_string(),
            api_key: SecretString::from("DEMO_KEY"),
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let c = HttpClassifier::new(&config("http://api:8000/"), PolicyThresholds::default()).unwrap();
        assert_eq!(c.endpoint(), "http://api:8000/classify");
        assert_eq!(c.name(), "http");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_or_timeout_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let c = HttpClassifier::new(
            &config(&format!("http://127.0.0.1:{port}")),
            PolicyThresholds::default(),
        )
        .unwrap();
        let err = c.classify(&ClassifyRequest::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::Transport(_) | ClassifierError::Timeout { .. }
        ));
    }
}
