//! Relay egress — hands finished messages to the downstream mail target.

pub mod smtp;

pub use smtp::SmtpRelay;

use async_trait::async_trait;

use crate::error::RelayError;

/// A message ready for submission, with its SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    /// Envelope sender; `None` is the null reverse-path.
    pub from: Option<String>,
    /// Envelope recipients.
    pub to: Vec<String>,
    /// Complete RFC 5322 message.
    pub raw: Vec<u8>,
}

/// Downstream mail target.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Submit one message.
    async fn send(&self, mail: OutboundMail) -> Result<(), RelayError>;
}
