//! SMTP email provider using lettre

use super::{EmailContent, EmailProvider, SentEmail, TransportBuilder};
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use core_config::{env_optional, env_parse, env_required, ConfigError, FromEnv};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        PoolConfig,
    },
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Port that implies an implicit-TLS connection.
pub const IMPLICIT_TLS_PORT: u16 = 465;

const DEFAULT_PORT: u16 = 587;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_MAX_SIZE: u32 = 2;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How the connection is secured, decided by the port alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (port 465)
    Implicit,
    /// Plaintext, upgraded with STARTTLS when the server offers it
    StartTls,
}

/// SMTP provider configuration
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: Option<String>,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .finish()
    }
}

impl SmtpConfig {
    pub fn tls_mode(&self) -> TlsMode {
        if self.port == IMPLICIT_TLS_PORT {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let username = env_required("EMAIL_USER")?;

        Ok(Self {
            host: env_required("SMTP_HOST")?,
            port: env_parse("SMTP_PORT", DEFAULT_PORT)?,
            password: env_required("EMAIL_PASS")?,
            from_email: env_optional("EMAIL_FROM").unwrap_or_else(|| username.clone()),
            from_name: env_optional("EMAIL_FROM_NAME"),
            username,
        })
    }
}

impl TransportBuilder for SmtpConfig {
    fn build(&self) -> MailResult<Arc<dyn EmailProvider>> {
        Ok(Arc::new(SmtpProvider::new(self.clone())?))
    }
}

/// SMTP email provider
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpProvider {
    /// Create a new SMTP provider. No network traffic happens here.
    pub fn new(config: SmtpConfig) -> MailResult<Self> {
        let email: Address = config
            .from_email
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {}", config.from_email, e)))?;
        let from = Mailbox::new(config.from_name.clone(), email);

        let tls_parameters = TlsParameters::new(config.host.clone())
            .map_err(|e| MailError::TransportUnavailable(format!("TLS setup failed: {}", e)))?;
        let tls = match config.tls_mode() {
            TlsMode::Implicit => Tls::Wrapper(tls_parameters),
            TlsMode::StartTls => Tls::Opportunistic(tls_parameters),
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls)
            .credentials(Credentials::new(config.username, config.password))
            .timeout(Some(SOCKET_TIMEOUT))
            .pool_config(
                PoolConfig::new()
                    .max_size(POOL_MAX_SIZE)
                    .idle_timeout(POOL_IDLE_TIMEOUT),
            )
            .build();

        debug!(host = %config.host, port = config.port, "SMTP transport configured");

        Ok(Self { transport, from })
    }

    fn build_message(&self, email: &EmailContent) -> MailResult<Message> {
        let to: Mailbox = email
            .to_email
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {}", email.to_email, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| MailError::InvalidAddress(e.to_string()))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailContent) -> MailResult<SentEmail> {
        let message = self.build_message(email)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailError::DeliveryRejected(e.to_string()))?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(
            to = %email.to_email,
            subject = %email.subject,
            "Email sent via SMTP"
        );

        Ok(SentEmail { message_id })
    }

    async fn health_check(&self) -> MailResult<()> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::TransportUnavailable(
                "SMTP server did not answer NOOP".to_string(),
            )),
            Err(e) => Err(MailError::TransportUnavailable(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
