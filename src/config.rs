//! Gateway configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::policy::{Action, DEFAULT_DISCARD_AT, DEFAULT_QUARANTINE_AT, PolicyThresholds};

/// Classifier service connection settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL; requests go to `{api_url}/classify`.
    pub api_url: String,
    /// Shared secret sent as `x-api-key`.
    pub api_key: SecretString,
    pub timeout: Duration,
}

/// Downstream SMTP relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    /// Name announced in EHLO to the relay.
    pub hello_name: String,
}

/// SMTP intake listener.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub listen_addr: SocketAddr,
    /// Name used in the greeting and EHLO response.
    pub hostname: String,
    pub max_message_bytes: usize,
    /// Connections idle longer than this are closed with 421.
    pub idle_timeout: Duration,
}

/// Fixed mailboxes used by the router.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub quarantine: String,
    pub security: String,
    pub alert_sender: String,
}

/// Immutable gateway configuration shared by every session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub classifier: ClassifierConfig,
    pub relay: RelayConfig,
    pub smtp: SmtpConfig,
    pub mailboxes: MailboxConfig,
    pub thresholds: PolicyThresholds,
    /// Label (or index) naming the sensitive class of a local model.
    pub sensitive_label: Option<String>,
    /// Routing action applied when classification fails.
    pub failure_action: Action,
}

impl GatewayConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("API_URL").unwrap_or_else(|| "http://api:8000".to_string());
        let api_key = SecretString::from(get("API_KEY").unwrap_or_else(|| "DEMO_KEY".to_string()));
        let classifier_timeout = parse_or(&get, "CLASSIFIER_TIMEOUT_SECS", 15u64)?;

        let smtp_hostname = get("SMTP_HOSTNAME").unwrap_or_else(|| "dlp-gateway.local".to_string());

        let quarantine_at = parse_or(&get, "DLP_QUARANTINE_AT", DEFAULT_QUARANTINE_AT)?;
        let discard_at = parse_or(&get, "DLP_DISCARD_AT", DEFAULT_DISCARD_AT)?;
        let thresholds = PolicyThresholds::new(quarantine_at, discard_at)?;

        let failure_action = match get("DLP_FAILURE_ACTION") {
            Some(raw) => Action::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "DLP_FAILURE_ACTION".into(),
                message: format!("expected deliver, quarantine or discard, got {raw:?}"),
            })?,
            None => Action::Quarantine,
        };

        Ok(Self {
            classifier: ClassifierConfig {
                api_url,
                api_key,
                timeout: Duration::from_secs(classifier_timeout),
            },
            relay: RelayConfig {
                host: get("RELAY_HOST").unwrap_or_else(|| "mailhog".to_string()),
                port: parse_or(&get, "RELAY_PORT", 1025u16)?,
                timeout: Duration::from_secs(parse_or(&get, "RELAY_TIMEOUT_SECS", 30u64)?),
                hello_name: smtp_hostname.clone(),
            },
            smtp: SmtpConfig {
                listen_addr: parse_or(
                    &get,
                    "SMTP_LISTEN_ADDR",
                    SocketAddr::from(([127, 0, 0, 1], 2525)),
                )?,
                hostname: smtp_hostname,
                max_message_bytes: parse_or(&get, "SMTP_MAX_MESSAGE_BYTES", 25 * 1024 * 1024)?,
                idle_timeout: Duration::from_secs(parse_or(&get, "SMTP_IDLE_TIMEOUT_SECS", 300u64)?),
            },
            mailboxes: MailboxConfig {
                quarantine: get("QUARANTINE_MAILBOX")
                    .unwrap_or_else(|| "quarantine@demo.local".to_string()),
                security: get("SECURITY_MAILBOX").unwrap_or_else(|| "security@demo.local".to_string()),
                alert_sender: get("ALERT_SENDER").unwrap_or_else(|| "dlp-alert@demo.local".to_string()),
            },
            thresholds,
            sensitive_label: get("SENSITIVE_LABEL"),
            failure_action,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
