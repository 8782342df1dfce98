//! Error types for the mail subsystem.
//!
//! Errors are categorized to decide what the delivery queue does with a
//! failed attempt:
//! - **Transient**: the job goes to the back of the queue until its retry
//!   budget is spent
//! - **Permanent**: the job is dropped on the spot and logged at error level

use core_config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure, retried up to the queue's limit
    Transient,
    /// Unrecoverable, never retried
    Permanent,
}

impl ErrorCategory {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

/// Errors that can occur while rendering or delivering an email.
#[derive(Debug, Error)]
pub enum MailError {
    /// The template kind has no renderer. Programmer error.
    #[error("Unknown email template kind: {0}")]
    UnknownTemplateKind(String),

    /// Untyped props did not match the shape the kind expects.
    #[error("Invalid properties for template {kind}: {details}")]
    InvalidTemplateProps { kind: String, details: String },

    /// Handlebars failed to register or render a template.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// The shared connection failed its verification handshake.
    #[error("Mail transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The send attempt did not settle inside the per-attempt window.
    #[error("Email delivery timed out after {0:?}")]
    DeliveryTimeout(Duration),

    /// The transport refused the message.
    #[error("Email delivery rejected: {0}")]
    DeliveryRejected(String),

    /// A sender or recipient address could not be parsed.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The mail service was started without a Tokio runtime to spawn on.
    #[error("Mail service requires a Tokio runtime: {0}")]
    Runtime(String),
}

impl MailError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MailError::TransportUnavailable(_)
            | MailError::DeliveryTimeout(_)
            | MailError::DeliveryRejected(_) => ErrorCategory::Transient,
            MailError::UnknownTemplateKind(_)
            | MailError::InvalidTemplateProps { .. }
            | MailError::Template(_)
            | MailError::InvalidAddress(_)
            | MailError::Config(_)
            | MailError::Runtime(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl From<handlebars::RenderError> for MailError {
    fn from(err: handlebars::RenderError) -> Self {
        MailError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for MailError {
    fn from(err: handlebars::TemplateError) -> Self {
        MailError::Template(err.to_string())
    }
}
