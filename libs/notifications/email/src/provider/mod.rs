//! Email provider implementations

pub mod mock;
pub mod smtp;

pub use mock::{MockOutcome, MockProvider};
pub use smtp::{SmtpConfig, SmtpProvider, TlsMode};

use crate::error::MailResult;
use async_trait::async_trait;
use std::sync::Arc;

/// A rendered email addressed to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub to_email: String,
    pub subject: String,
    pub html_body: String,
}

/// Result of sending an email
#[derive(Debug, Clone, Default)]
pub struct SentEmail {
    /// Provider-specific message ID, when the server reports one
    pub message_id: Option<String>,
}

/// Trait for email providers
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email
    async fn send(&self, email: &EmailContent) -> MailResult<SentEmail>;

    /// Verification handshake. Fails with `TransportUnavailable`.
    async fn health_check(&self) -> MailResult<()>;

    /// Get provider name
    fn name(&self) -> &'static str;
}

/// Constructs a provider without verifying it.
#[cfg_attr(test, mockall::automock)]
pub trait TransportBuilder: Send + Sync {
    fn build(&self) -> MailResult<Arc<dyn EmailProvider>>;
}
