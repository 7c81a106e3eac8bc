//! Error types for the DLP gateway.
//!
//! None of these ever reach the submitting client: the session handler
//! logs them and acknowledges the message regardless.

use std::time::Duration;

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("SMTP intake error: {0}")]
    Smtp(#[from] SmtpError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid policy thresholds: quarantine_at ({quarantine_at}) must be below discard_at ({discard_at})")]
    InvertedThresholds { quarantine_at: f64, discard_at: f64 },
}

/// Failures talking to the classifier service.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Classifier transport error: {0}")]
    Transport(String),

    #[error("Classifier rejected the shared credential")]
    AuthRejected,

    #[error("Classifier returned HTTP {status}")]
    Status { status: u16 },

    #[error("Invalid classifier response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Scoring model failed: {0}")]
    Model(#[from] ModelError),
}

/// Downstream relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Message has no deliverable recipients")]
    NoRecipients,

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP relay {host}:{port} failed: {reason}")]
    SendFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Relay task aborted: {0}")]
    TaskAborted(String),
}

/// SMTP intake errors (listener level; per-session problems are answered on the wire).
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("Failed to bind SMTP listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a scoring model implementation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model inference failed: {0}")]
    Inference(String),

    #[error("Model produced {got} values, head expects {expected}")]
    ShapeMismatch { expected: usize, got: usize },
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
