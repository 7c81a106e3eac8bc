//! SMTP relay via lettre.

use std::str::FromStr;

use async_trait::async_trait;
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::extension::ClientId;
use lettre::{SmtpTransport, Transport};
use tracing::info;

use super::{MailTransport, OutboundMail};
use crate::config::RelayConfig;
use crate::error::RelayError;

/// Plain SMTP submission to the configured relay host.
pub struct SmtpRelay {
    transport: SmtpTransport,
    host: String,
    port: u16,
}

impl SmtpRelay {
    pub fn new(config: &RelayConfig) -> Self {
        let transport = SmtpTransport::builder_dangerous(&config.host)
            .port(config.port)
            .timeout(Some(config.timeout))
            .hello_name(ClientId::Domain(config.hello_name.clone()))
            .build();
        Self {
            transport,
            host: config.host.clone(),
            port: config.port,
        }
    }
}

/// Build a lettre envelope, rejecting malformed addresses.
pub fn build_envelope(mail: &OutboundMail) -> Result<Envelope, RelayError> {
    let from = mail
        .from
        .as_deref()
        .filter(|f| !f.is_empty())
        .map(parse_address)
        .transpose()?;
    let to = mail
        .to
        .iter()
        .map(|r| parse_address(r))
        .collect::<Result<Vec<_>, _>>()?;
    if to.is_empty() {
        return Err(RelayError::NoRecipients);
    }
    Envelope::new(from, to).map_err(|e| RelayError::Build(e.to_string()))
}

fn parse_address(s: &str) -> Result<Address, RelayError> {
    Address::from_str(s.trim()).map_err(|e| RelayError::InvalidAddress {
        address: s.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl MailTransport for SmtpRelay {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, mail: OutboundMail) -> Result<(), RelayError> {
        let envelope = build_envelope(&mail)?;
        let transport = self.transport.clone();
        let recipients = mail.to.len();

        tokio::task::spawn_blocking(move || transport.send_raw(&envelope, &mail.raw))
            .await
            .map_err(|e| RelayError::TaskAborted(e.to_string()))?
            .map_err(|e| RelayError::SendFailed {
                host: self.host.clone(),
                port: self.port,
                reason: e.to_string(),
            })?;

        info!(host = %self.host, port = self.port, recipients, "Message relayed");
        Ok(())
    }
}
