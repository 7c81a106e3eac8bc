//! Session handler — one pipeline run per inbound message.
//!
//! Extract → classify → route → acknowledge. Every outcome, including
//! internal failures, is acknowledged as accepted so the sender never sees
//! a bounce. A classifier failure routes with the configured failure action
//! instead of leaving delivery undefined.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, ClassifyRequest};
use crate::extract::extract;
use crate::policy::Action;
use crate::routing::{MailRouter, RoutingDecision, SessionState, SessionTrace};

/// One completed SMTP transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    /// `MAIL FROM` path; empty for the null sender.
    pub mail_from: String,
    /// `RCPT TO` paths in order.
    pub rcpt_tos: Vec<String>,
    /// Message bytes as received after DATA.
    pub content: Vec<u8>,
}

impl InboundEnvelope {
    /// Reverse path for relaying, `None` for the null sender.
    pub fn reverse_path(&self) -> Option<String> {
        (!self.mail_from.is_empty()).then(|| self.mail_from.clone())
    }
}

/// Protocol-level answer to the submitting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    Accepted,
}

impl Acknowledgment {
    /// SMTP reply line (without CRLF).
    pub fn smtp_reply(&self) -> &'static str {
        match self {
            Self::Accepted => "250 OK",
        }
    }
}

/// What happened to one message. Carries no content.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub action: Option<Action>,
    pub trace: SessionTrace,
    pub ack: Acknowledgment,
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        self.trace.state()
    }
}

/// Runs the pipeline for each inbound message.
pub struct SessionHandler {
    classifier: Arc<dyn Classifier>,
    router: MailRouter,
    failure_action: Action,
}

impl SessionHandler {
    pub fn new(classifier: Arc<dyn Classifier>, router: MailRouter, failure_action: Action) -> Self {
        Self {
            classifier,
            router,
            failure_action,
        }
    }

    /// Process one envelope. Always acknowledges.
    pub async fn handle(&self, envelope: InboundEnvelope) -> SessionOutcome {
        let session_id = Uuid::new_v4();
        let mut trace = SessionTrace::new();

        info!(
            session_id = %session_id,
            recipients = envelope.rcpt_tos.len(),
            bytes = envelope.content.len(),
            "Processing inbound message"
        );

        let message = extract(&envelope.content);
        step(&mut trace, session_id, SessionState::Extracted, None);

        let request = ClassifyRequest::from_message(&message, envelope_headers(&envelope, &message.subject));

        let decision = match self.classifier.classify(&request).await {
            Ok(classification) => {
                info!(
                    session_id = %session_id,
                    classifier = self.classifier.name(),
                    label = %classification.label,
                    score = classification.sensitivity_score,
                    action = %classification.action,
                    "Message classified"
                );
                step(&mut trace, session_id, SessionState::Classified, None);
                RoutingDecision {
                    action: classification.action,
                    classification: Some(classification),
                    fallback_reason: None,
                }
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    classifier = self.classifier.name(),
                    error = %e,
                    fallback = %self.failure_action,
                    "Classification failed, applying failure action"
                );
                RoutingDecision {
                    action: self.failure_action,
                    classification: None,
                    fallback_reason: Some(e.to_string()),
                }
            }
        };

        step(
            &mut trace,
            session_id,
            SessionState::Routed,
            decision.fallback_reason.clone(),
        );

        match self
            .router
            .route(session_id, &envelope, &message, &decision)
            .await
        {
            Ok(terminal) => step(&mut trace, session_id, terminal, None),
            Err(e) => {
                error!(
                    session_id = %session_id,
                    action = %decision.action,
                    error = %e,
                    "Relay failed, message not delivered"
                );
                step(&mut trace, session_id, SessionState::Failed, Some(e.to_string()));
            }
        }

        SessionOutcome {
            session_id,
            action: Some(decision.action),
            trace,
            ack: Acknowledgment::Accepted,
        }
    }
}

/// Envelope-derived headers sent to the classifier in place of the message's own.
fn envelope_headers(envelope: &InboundEnvelope, subject: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("From".to_string(), envelope.mail_from.clone()),
        ("To".to_string(), envelope.rcpt_tos.join(",")),
        ("Subject".to_string(), subject.to_string()),
    ])
}

fn step(trace: &mut SessionTrace, session_id: Uuid, state: SessionState, reason: Option<String>) {
    if let Err(e) = trace.transition_to(state, reason) {
        warn!(session_id = %session_id, error = %e, "Unexpected session transition");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::ClassificationResult;
    use crate::config::MailboxConfig;
    use crate::error::{ClassifierError, RelayError};
    use crate::relay::{MailTransport, OutboundMail};

    /// Returns a fixed score, or fails.
    struct StubClassifier {
        score: Option<f64>,
        seen: Mutex<Vec<ClassifyRequest>>,
    }

    impl StubClassifier {
        fn scoring(score: f64) -> Self {
            Self {
                score: Some(score),
                seen: Mutex::new(Vec::new()),
            }
        }
        fn failing() -> Self {
            Self {
                score: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        fn name(&self) -> &str {
            "stub"
        }
        async fn classify(
            &self,
            request: &ClassifyRequest,
        ) -> Result<ClassificationResult, ClassifierError> {
            self.seen.lock().unwrap().push(request.clone());
            let score = self.score.ok_or(ClassifierError::Timeout {
                timeout: Duration::from_secs(15),
            })?;
            Ok(ClassificationResult {
                label: "sensitive".into(),
                sensitivity_score: score,
                score_distribution: BTreeMap::new(),
                action: crate::policy::PolicyThresholds::default().decide(score),
                model_version: None,
                policy_version: "v1-thresholds-0.5-0.8".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        fail: bool,
        sent: Mutex<Vec<OutboundMail>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }
        async fn send(&self, mail: OutboundMail) -> Result<(), RelayError> {
            if self.fail {
                return Err(RelayError::SendFailed {
                    host: "relay".into(),
                    port: 25,
                    reason: "connection refused".into(),
                });
            }
            self.sent.lock().unwrap().push(mail);
            Ok(())
        }
    }

    fn handler(
        classifier: Arc<StubClassifier>,
        transport: Arc<RecordingTransport>,
        failure_action: Action,
    ) -> SessionHandler {
        let router = MailRouter::new(
            transport,
            MailboxConfig {
                quarantine: "quarantine@demo.local".into(),
                security: "security@demo.local".into(),
                alert_sender: "dlp-alert@demo.local".into(),
            },
        );
        SessionHandler::new(classifier, router, failure_action)
    }

    fn envelope() -> InboundEnvelope {
        InboundEnvelope {
            mail_from: "alice@corp.com".into(),
            rcpt_tos: vec!["finance@demo.local".into()],
            content: b"From: alice@corp.com\r\nTo: finance@demo.local\r\nSubject: Q3 Salary Sheet (Confidential)\r\n\r\nTeam, attached are the confidential salary sheets for Q3.\r\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn low_score_delivers_original() {
        let classifier = Arc::new(StubClassifier::scoring(0.3));
        let transport = Arc::new(RecordingTransport::default());
        let h = handler(classifier.clone(), transport.clone(), Action::Quarantine);

        let outcome = h.handle(envelope()).await;

        assert_eq!(outcome.ack, Acknowledgment::Accepted);
        assert_eq!(outcome.state(), SessionState::Delivered);
        assert_eq!(
            outcome.trace.path(),
            vec![
                SessionState::Received,
                SessionState::Extracted,
                SessionState::Classified,
                SessionState::Routed,
                SessionState::Delivered,
            ]
        );
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].raw, envelope().content);
        assert_eq!(sent[0].to, vec!["finance@demo.local".to_string()]);
    }

    #[tokio::test]
    async fn classifier_sees_envelope_headers_and_body() {
        let classifier = Arc::new(StubClassifier::scoring(0.1));
        let transport = Arc::new(RecordingTransport::default());
        let h = handler(classifier.clone(), transport, Action::Quarantine);

        h.handle(envelope()).await;

        let seen = classifier.seen.lock().unwrap();
        assert_eq!(seen[0].subject, "Q3 Salary Sheet (Confidential)");
        assert!(seen[0].body.contains("confidential salary sheets"));
        assert_eq!(seen[0].headers["From"], "alice@corp.com");
        assert_eq!(seen[0].headers["To"], "finance@demo.local");
    }

    #[tokio::test]
    async fn high_score_discards_with_alert() {
        let classifier = Arc::new(StubClassifier::scoring(0.95));
        let transport = Arc::new(RecordingTransport::default());
        let h = handler(classifier, transport.clone(), Action::Quarantine);

        let outcome = h.handle(envelope()).await;

        assert_eq!(outcome.action, Some(Action::Discard));
        assert_eq!(outcome.state(), SessionState::Discarded);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["security@demo.local".to_string()]);
        let alert = String::from_utf8_lossy(&sent[0].raw);
        assert!(alert.contains("Q3 Salary Sheet (Confidential)"));
        assert!(alert.contains("alice@corp.com"));
    }

    #[tokio::test]
    async fn classifier_failure_applies_failure_action() {
        let classifier = Arc::new(StubClassifier::failing());
        let transport = Arc::new(RecordingTransport::default());
        let h = handler(classifier, transport.clone(), Action::Quarantine);

        let outcome = h.handle(envelope()).await;

        assert_eq!(outcome.ack, Acknowledgment::Accepted);
        assert_eq!(outcome.action, Some(Action::Quarantine));
        assert_eq!(outcome.state(), SessionState::Quarantined);
        assert!(!outcome.trace.path().contains(&SessionState::Classified));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].to, vec!["quarantine@demo.local".to_string()]);
    }

    #[tokio::test]
    async fn relay_failure_still_acknowledges() {
        let classifier = Arc::new(StubClassifier::scoring(0.3));
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let h = handler(classifier, transport, Action::Quarantine);

        let outcome = h.handle(envelope()).await;

        assert_eq!(outcome.ack, Acknowledgment::Accepted);
        assert_eq!(outcome.state(), SessionState::Failed);
        assert!(outcome.trace.transitions().last().unwrap().reason.is_some());
    }

    #[tokio::test]
    async fn malformed_envelope_is_acknowledged() {
        let classifier = Arc::new(StubClassifier::scoring(0.2));
        let transport = Arc::new(RecordingTransport::default());
        let h = handler(classifier.clone(), transport, Action::Quarantine);

        let outcome = h
            .handle(InboundEnvelope {
                mail_from: String::new(),
                rcpt_tos: vec!["bob@demo.local".into()],
                content: b"\xff\xfe\x00 not mime at all".to_vec(),
            })
            .await;

        assert_eq!(outcome.ack.smtp_reply(), "250 OK");
        assert!(outcome.state().is_terminal());
        assert_eq!(classifier.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn null_sender_has_no_reverse_path() {
        let mut env = envelope();
        assert_eq!(env.reverse_path().as_deref(), Some("alice@corp.com"));
        env.mail_from.clear();
        assert!(env.reverse_path().is_none());
    }
}
