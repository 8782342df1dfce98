//! Calendar Mailer
//!
//! Command-line front end for the calendar app's transactional email.
//!
//! ```text
//! calendar_mailer <command>
//!   ↓ (enqueue, returns at once)
//! MailService::send_mail
//!   ↓ (single background worker, FIFO, up to 3 retries)
//! TemplateRenderer (Handlebars, cached)
//!   ↓
//! TransportProvider (SMTP, verified once)
//! ```
//!
//! The process waits for the job to reach `Delivered` or `Dropped`, a shutdown
//! signal, or the grace period, whichever comes first.

use clap::{Parser, Subcommand};
use core_config::{Environment, FromEnv};
use email::{
    generate_otp, AuthNotifier, DeliveryEvent, EmailTemplate, JobState, MailService,
    MailServiceConfig, SmtpConfig,
};
use eyre::{bail, eyre, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Send the calendar app's transactional emails over SMTP"
)]
pub struct Cli {
    /// Seconds to wait for delivery before giving up
    #[arg(long, global = true, default_value_t = 120)]
    pub grace_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a one-time verification code
    Otp {
        #[arg(long)]
        to: String,
        /// Code to send; a random 6-digit code when omitted
        #[arg(long)]
        otp: Option<String>,
    },
    /// Send a password reset link
    Reset {
        #[arg(long)]
        to: String,
        #[arg(long)]
        link: String,
        #[arg(long)]
        username: Option<String>,
    },
    /// Send any template with JSON props
    Send {
        #[arg(long)]
        to: String,
        /// Template kind, e.g. EmailOTPVerification
        #[arg(long)]
        template: String,
        #[arg(long)]
        props: String,
    },
    /// Check the SMTP settings without sending anything
    Verify,
}

impl Cli {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Command {
    /// Queue the email this command describes.
    fn enqueue(&self, mail: &Arc<MailService>) -> Result<Option<Uuid>> {
        let notifier = AuthNotifier::new(Arc::clone(mail));

        let job_id = match self {
            Command::Otp { to, otp } => {
                let otp = otp.clone().unwrap_or_else(generate_otp);
                notifier.send_verification_otp(to, &otp)
            }
            Command::Reset { to, link, username } => {
                notifier.send_password_reset(to, username.as_deref(), link)
            }
            Command::Send {
                to,
                template,
                props,
            } => mail.send_mail(to.as_str(), parse_template(template, props)?),
            Command::Verify => return Ok(None),
        };

        Ok(Some(job_id))
    }
}

/// Build a template from a kind name and a JSON props document.
pub fn parse_template(kind: &str, props: &str) -> Result<EmailTemplate> {
    let props: serde_json::Value =
        serde_json::from_str(props).wrap_err("--props is not valid JSON")?;
    EmailTemplate::from_parts(kind, props).wrap_err("Invalid template")
}

/// Run the mailer
///
/// This is the main entry point for the binary. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads SMTP settings from the environment
/// 3. Starts the mail service and queues the requested email
/// 4. Waits for the delivery outcome with graceful shutdown handling
///
/// # Errors
///
/// Returns an error if:
/// - SMTP configuration is missing or invalid
/// - The template or its props are invalid
/// - The email was dropped, or did not finish within the grace period
pub async fn run(cli: Cli) -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting calendar mailer"
    );

    let smtp = SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?;
    info!(host = %smtp.host, port = smtp.port, tls = ?smtp.tls_mode(), "SMTP configuration loaded");

    let mail = Arc::new(
        MailService::start(MailServiceConfig::default(), Arc::new(smtp))
            .wrap_err("Failed to start mail service")?,
    );

    if cli.command == Command::Verify {
        return verify(&mail, cli.grace()).await;
    }

    // Subscribe before queueing so no event is missed
    let events = mail.subscribe();
    let job_id = cli
        .command
        .enqueue(&mail)?
        .ok_or_else(|| eyre!("Nothing to send"))?;

    let outcome = tokio::select! {
        outcome = wait_for_outcome(events, job_id) => outcome?,
        _ = shutdown_signal() => {
            mail.shutdown(Duration::ZERO).await;
            bail!("Interrupted before email {} was delivered", job_id);
        }
        _ = tokio::time::sleep(cli.grace()) => {
            mail.shutdown(Duration::ZERO).await;
            bail!("Email {} was not delivered within {:?}", job_id, cli.grace());
        }
    };

    mail.shutdown(Duration::ZERO).await;
    report(&outcome)
}

async fn verify(mail: &MailService, grace: Duration) -> Result<()> {
    tokio::time::timeout(grace, mail.transport().get_connection())
        .await
        .map_err(|_| eyre!("SMTP verification did not finish within {:?}", grace))?
        .wrap_err("SMTP verification failed")?;

    println!("SMTP server is ready to send emails");
    Ok(())
}

/// Follow `job_id` through the event stream until it is terminal.
pub async fn wait_for_outcome(
    mut events: broadcast::Receiver<DeliveryEvent>,
    job_id: Uuid,
) -> Result<DeliveryEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.job_id == job_id => {
                debug!(attempt = event.attempt, state = ?event.state, "Delivery progress");
                if event.state.is_terminal() {
                    return Ok(event);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed delivery events");
            }
            Err(RecvError::Closed) => bail!("Mail service stopped before email {} finished", job_id),
        }
    }
}

fn report(event: &DeliveryEvent) -> Result<()> {
    match event.state {
        JobState::Delivered => {
            println!(
                "Delivered {} email {} to {} (attempt {})",
                event.template, event.job_id, event.recipient, event.attempt
            );
            Ok(())
        }
        _ => Err(eyre!(
            "Email {} to {} was dropped after {} attempt(s): {}",
            event.job_id,
            event.recipient,
            event.attempt,
            event.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install signal handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use email::{MockProvider, TemplateKind};

    #[test]
    fn test_parse_otp_command() {
        let cli = Cli::try_parse_from(["calendar_mailer", "otp", "--to", "a@x.com"]).unwrap();
        assert_eq!(cli.grace_secs, 120);
        assert_eq!(
            cli.command,
            Command::Otp {
                to: "a@x.com".to_string(),
                otp: None
            }
        );
    }

    #[test]
    fn test_parse_global_grace_after_subcommand() {
        let cli = Cli::try_parse_from([
            "calendar_mailer",
            "reset",
            "--to",
            "a@x.com",
            "--link",
            "https://bobo.app/reset/abc",
            "--grace-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_send_requires_props() {
        let result = Cli::try_parse_from([
            "calendar_mailer",
            "send",
            "--to",
            "a@x.com",
            "--template",
            "EmailOTPVerification",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_template() {
        let template = parse_template("EmailOTPVerification", r#"{"otp": "123456"}"#).unwrap();
        assert_eq!(template.kind(), TemplateKind::EmailOtpVerification);

        assert!(parse_template("EmailOTPVerification", "not json").is_err());
        assert!(parse_template("Invitation", r#"{"otp": "1"}"#).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_for_delivery() {
        let mock = Arc::new(MockProvider::new());
        let mail = Arc::new(
            MailService::start(MailServiceConfig::default(), Arc::new(mock.clone())).unwrap(),
        );
        let events = mail.subscribe();

        let command = Command::Otp {
            to: "a@x.com".to_string(),
            otp: Some("123456".to_string()),
        };
        let job_id = command.enqueue(&mail).unwrap().unwrap();

        let outcome = wait_for_outcome(events, job_id).await.unwrap();
        assert_eq!(outcome.state, JobState::Delivered);
        assert!(report(&outcome).is_ok());
        assert!(mock.delivered().await[0].html_body.contains("123456"));
    }

    #[tokio::test]
    async fn test_dropped_job_is_an_error() {
        let mock = Arc::new(MockProvider::rejecting("550 no such user"));
        let mail = Arc::new(
            MailService::start(MailServiceConfig::default(), Arc::new(mock.clone())).unwrap(),
        );
        let events = mail.subscribe();

        let command = Command::Reset {
            to: "a@x.com".to_string(),
            link: "https://bobo.app/reset/abc".to_string(),
            username: None,
        };
        let job_id = command.enqueue(&mail).unwrap().unwrap();

        let outcome = wait_for_outcome(events, job_id).await.unwrap();
        assert_eq!(outcome.state, JobState::Dropped);
        let err = report(&outcome).unwrap_err();
        assert!(err.to_string().contains("550 no such user"));
    }

    #[tokio::test]
    async fn test_verify_command_queues_nothing() {
        let mock = Arc::new(MockProvider::new());
        let mail = Arc::new(
            MailService::start(MailServiceConfig::default(), Arc::new(mock.clone())).unwrap(),
        );

        assert_eq!(Command::Verify.enqueue(&mail).unwrap(), None);
        verify(&mail, Duration::from_secs(5)).await.unwrap();
        assert_eq!(mock.health_checks(), 1);
        assert_eq!(mock.attempt_count(), 0);
    }
}
