//! Router — executes a routing action against the relay.
//!
//! - Deliver: original bytes to the original recipients.
//! - Quarantine: `To` rewritten to the quarantine mailbox, everything else kept.
//! - Discard: original dropped, a synthesized alert goes to the security mailbox.

pub mod state;

pub use state::{SessionState, SessionTrace, StateTransition};

use std::sync::Arc;

use chrono::Utc;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use tracing::info;
use uuid::Uuid;

use crate::classifier::ClassificationResult;
use crate::config::MailboxConfig;
use crate::error::RelayError;
use crate::extract::ParsedMessage;
use crate::policy::Action;
use crate::relay::{MailTransport, OutboundMail};
use crate::session::InboundEnvelope;

/// What the router should do with one message.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub action: Action,
    /// `None` when the classifier failed and a fallback action applies.
    pub classification: Option<ClassificationResult>,
    /// Why the fallback action was used.
    pub fallback_reason: Option<String>,
}

/// Executes routing decisions through a [`MailTransport`].
pub struct MailRouter {
    transport: Arc<dyn MailTransport>,
    mailboxes: MailboxConfig,
}

impl MailRouter {
    pub fn new(transport: Arc<dyn MailTransport>, mailboxes: MailboxConfig) -> Self {
        Self {
            transport,
            mailboxes,
        }
    }

    /// Compose and send the mail for `decision`. Returns the terminal state reached.
    pub async fn route(
        &self,
        session_id: Uuid,
        envelope: &InboundEnvelope,
        message: &ParsedMessage,
        decision: &RoutingDecision,
    ) -> Result<SessionState, RelayError> {
        let (mail, terminal) = match decision.action {
            Action::Deliver => (
                OutboundMail {
                    from: envelope.reverse_path(),
                    to: envelope.rcpt_tos.clone(),
                    raw: envelope.content.clone(),
                },
                SessionState::Delivered,
            ),
            Action::Quarantine => (
                OutboundMail {
                    from: envelope.reverse_path(),
                    to: vec![self.mailboxes.quarantine.clone()],
                    raw: rewrite_recipient(&envelope.content, &self.mailboxes.quarantine),
                },
                SessionState::Quarantined,
            ),
            Action::Discard => (
                compose_alert(session_id, envelope, message, decision, &self.mailboxes)?,
                SessionState::Discarded,
            ),
        };

        self.transport.send(mail).await?;
        info!(
            session_id = %session_id,
            transport = self.transport.name(),
            outcome = %terminal,
            "Routing complete"
        );
        Ok(terminal)
    }
}

/// Replace every `To` header with a single one naming `mailbox`.
///
/// Adds the header if the message has none. Body and other headers are
/// copied byte for byte.
pub fn rewrite_recipient(raw: &[u8], mailbox: &str) -> Vec<u8> {
    let (head, body) = split_header_block(raw);
    let bare_lf = head.contains(&b'\n') && !head.windows(2).any(|w| w == b"\r\n");
    let eol: &[u8] = if bare_lf { b"\n" } else { b"\r\n" };

    let mut to_line = format!("To: {mailbox}").into_bytes();
    to_line.extend_from_slice(eol);

    let mut out = Vec::with_capacity(raw.len() + to_line.len());
    let mut replaced = false;
    let mut skipping = false;

    for line in head.split_inclusive(|&b| b == b'\n') {
        let continuation = line.first().is_some_and(|b| *b == b' ' || *b == b'\t');
        if continuation {
            if !skipping {
                out.extend_from_slice(line);
            }
            continue;
        }

        skipping = header_name_is(line, "to");
        if skipping {
            if !replaced {
                out.extend_from_slice(&to_line);
                replaced = true;
            }
            continue;
        }
        out.extend_from_slice(line);
    }

    if !replaced {
        if out.last().is_some_and(|b| *b != b'\n') {
            out.extend_from_slice(eol);
        }
        out.extend_from_slice(&to_line);
    }
    out.extend_from_slice(body);
    out
}

/// Split at the blank line ending the header block. The body keeps the blank line.
fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") || raw.starts_with(b"\n") {
        return (&[], raw);
    }
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 2);
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 1);
    match (crlf, lf) {
        (Some(a), Some(b)) => raw.split_at(a.min(b)),
        (Some(p), None) | (None, Some(p)) => raw.split_at(p),
        (None, None) => (raw, &[]),
    }
}

fn header_name_is(line: &[u8], name: &str) -> bool {
    line.iter()
        .position(|b| *b == b':')
        .is_some_and(|colon| line[..colon].trim_ascii_end().eq_ignore_ascii_case(name.as_bytes()))
}

/// Build the security alert that replaces a discarded message.
pub fn compose_alert(
    session_id: Uuid,
    envelope: &InboundEnvelope,
    message: &ParsedMessage,
    decision: &RoutingDecision,
    mailboxes: &MailboxConfig,
) -> Result<OutboundMail, RelayError> {
    let original_subject = if message.subject.is_empty() {
        "(no subject)"
    } else {
        message.subject.as_str()
    };
    let sender = if envelope.mail_from.is_empty() {
        "<>"
    } else {
        envelope.mail_from.as_str()
    };

    let mut body = format!(
        "A message was discarded by DLP policy.\n\n\
         Sender: {sender}\n\
         Recipients: {}\n\
         Original subject: {original_subject}\n\
         Action: {}\n",
        envelope.rcpt_tos.join(","),
        decision.action.wire_name(),
    );
    match (&decision.classification, &decision.fallback_reason) {
        (Some(c), _) => {
            body.push_str(&format!(
                "Label: {}\nScore: {:.4}\nModel version: {}\nPolicy version: {}\n",
                c.label,
                c.sensitivity_score,
                c.model_version.as_deref().unwrap_or("unknown"),
                c.policy_version,
            ));
        }
        (None, reason) => {
            body.push_str(&format!(
                "Classification: unavailable ({})\n",
                reason.as_deref().unwrap_or("no result")
            ));
        }
    }
    body.push_str(&format!(
        "Session: {session_id}\nDetected at: {}\n",
        Utc::now().to_rfc3339()
    ));

    let from: Mailbox = parse_mailbox(&mailboxes.alert_sender)?;
    let to: Mailbox = parse_mailbox(&mailboxes.security)?;
    let alert = Message::builder()
        .from(from)
        .to(to)
        .subject(format!("[DLP ALERT] Message discarded - {original_subject}"))
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| RelayError::Build(e.to_string()))?;

    Ok(OutboundMail {
        from: Some(mailboxes.alert_sender.clone()),
        to: vec![mailboxes.security.clone()],
        raw: alert.formatted(),
    })
}

fn parse_mailbox(s: &str) -> Result<Mailbox, RelayError> {
    s.parse().map_err(|e: lettre::address::AddressError| RelayError::InvalidAddress {
        address: s.to_string(),
        reason: e.to_string(),
    })
}
