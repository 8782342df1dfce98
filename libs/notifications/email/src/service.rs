//! Mail service: the fire-and-forget entry point and its lifecycle.
//!
//! `MailService` owns the renderer, the transport provider and the delivery
//! queue, and runs the housekeeping task that periodically clears the
//! template cache.

use crate::error::{MailError, MailResult};
use crate::job::EmailJob;
use crate::metrics::MailMetrics;
use crate::provider::{SmtpConfig, TransportBuilder};
use crate::queue::{DeliveryEvent, DeliveryQueue, QueueConfig};
use crate::templates::{Branding, EmailTemplate, TemplateRenderer};
use crate::transport::TransportProvider;
use core_config::FromEnv;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIN_CACHE_CLEAR_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the mail service.
#[derive(Debug, Clone)]
pub struct MailServiceConfig {
    pub queue: QueueConfig,
    /// How often the template cache is emptied.
    pub cache_clear_interval: Duration,
    pub branding: Branding,
}

impl Default for MailServiceConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            cache_clear_interval: Duration::from_secs(60 * 60),
            branding: Branding::default(),
        }
    }
}

/// Service for queueing emails for background delivery.
pub struct MailService {
    queue: DeliveryQueue,
    renderer: Arc<TemplateRenderer>,
    transport: Arc<TransportProvider>,
    metrics: MailMetrics,
    // Dropping the sender also stops housekeeping.
    shutdown_tx: watch::Sender<bool>,
}

impl MailService {
    /// Start the service on the current Tokio runtime.
    ///
    /// Nothing touches the network here; the transport is built and verified
    /// by the first delivery attempt.
    pub fn start(config: MailServiceConfig, builder: Arc<dyn TransportBuilder>) -> MailResult<Self> {
        let runtime = Handle::try_current().map_err(|e| MailError::Runtime(e.to_string()))?;

        let renderer = Arc::new(TemplateRenderer::new(config.branding)?);
        let transport = Arc::new(TransportProvider::new(builder));
        let metrics = MailMetrics::default();
        let queue = DeliveryQueue::new(
            config.queue.clone(),
            Arc::clone(&renderer),
            Arc::clone(&transport),
            metrics.clone(),
        )?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(clear_cache_periodically(
            Arc::clone(&renderer),
            metrics.clone(),
            config.cache_clear_interval.max(MIN_CACHE_CLEAR_INTERVAL),
            shutdown_rx,
        ));

        info!(
            max_retries = config.queue.max_retries,
            send_timeout_ms = config.queue.send_timeout.as_millis() as u64,
            cache_clear_interval_secs = config.cache_clear_interval.as_secs(),
            "Mail service started"
        );

        Ok(Self {
            queue,
            renderer,
            transport,
            metrics,
            shutdown_tx,
        })
    }

    /// Start with SMTP settings from the environment and default tuning.
    pub fn from_env() -> MailResult<Self> {
        let smtp = SmtpConfig::from_env()?;
        info!(
            host = %smtp.host,
            port = smtp.port,
            tls = ?smtp.tls_mode(),
            "Loaded SMTP configuration"
        );

        Self::start(MailServiceConfig::default(), Arc::new(smtp))
    }

    /// Queue an email and return at once.
    ///
    /// Delivery happens in the background. The returned job ID only
    /// acknowledges acceptance; failures are visible through logs, metrics
    /// and [`subscribe`](MailService::subscribe), never to the caller.
    pub fn send_mail(&self, recipient: impl Into<String>, template: EmailTemplate) -> Uuid {
        let job = EmailJob::new(recipient, template);
        let job_id = job.id;

        self.metrics.job_enqueued(job.kind());
        info!(
            job_id = %job_id,
            recipient = %job.recipient,
            template = %job.kind(),
            "Email queued"
        );

        self.queue.push(job);
        job_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.queue.subscribe()
    }

    /// Jobs waiting for an attempt
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    pub fn renderer(&self) -> &Arc<TemplateRenderer> {
        &self.renderer
    }

    pub fn transport(&self) -> &Arc<TransportProvider> {
        &self.transport
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Stop housekeeping and give the queue up to `grace` to drain.
    ///
    /// Returns `true` if every queued job reached a terminal state in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);

        let drained = tokio::time::timeout(grace, self.queue.wait_idle())
            .await
            .is_ok();

        if drained {
            info!("Mail service stopped with an empty queue");
        } else {
            warn!(
                pending = self.pending(),
                in_flight = self.queue.is_worker_active(),
                "Mail service stopped before the queue drained"
            );
        }
        drained
    }
}

async fn clear_cache_periodically(
    renderer: Arc<TemplateRenderer>,
    metrics: MailMetrics,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let entries = renderer.clear_cache().await;
                metrics.cache_cleared();
                info!(entries, "Email template cache cleared");
            }
            _ = shutdown.changed() => {
                debug!("Template cache housekeeping stopped");
                break;
            }
        }
    }
}
