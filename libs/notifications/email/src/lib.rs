//! In-process email delivery with retry
//!
//! This library queues transactional emails and delivers them in the
//! background over a single shared SMTP connection.
//!
//! ## Components
//!
//! - **Templates**: `TemplateRenderer` renders an `EmailTemplate` with Handlebars and caches the body
//! - **Transport**: `TransportProvider` builds and verifies the connection once, on first use
//! - **Queue**: `DeliveryQueue` runs one worker that attempts jobs in FIFO order with bounded retries
//! - **Service**: `MailService::send_mail` is the fire-and-forget entry point
//! - **Providers**: SMTP via lettre, and a scriptable `MockProvider`
//!
//! ## Usage
//!
//! ```ignore
//! use email::{EmailTemplate, MailService};
//!
//! let mail = MailService::from_env()?;
//! mail.send_mail("a@x.com", EmailTemplate::otp("123456"));
//! mail.shutdown(Duration::from_secs(30)).await;
//! ```

// Core modules
pub mod error;
pub mod job;
pub mod metrics;
pub mod notifications;
pub mod provider;
pub mod queue;
pub mod service;
pub mod templates;
pub mod transport;

// Re-export main types
pub use error::{ErrorCategory, MailError, MailResult};
pub use job::{EmailJob, JobState};
pub use metrics::MailMetrics;
pub use notifications::{generate_otp, AuthNotifier};
pub use queue::{DeliveryEvent, DeliveryQueue, QueueConfig};
pub use service::{MailService, MailServiceConfig};
pub use templates::{
    Branding, EmailTemplate, OtpVerificationProps, PasswordResetLinkProps, RenderedEmail,
    TemplateKind, TemplateRenderer,
};
pub use transport::TransportProvider;

pub use provider::{
    EmailContent, EmailProvider, MockOutcome, MockProvider, SentEmail, SmtpConfig, SmtpProvider,
    TlsMode, TransportBuilder,
};
