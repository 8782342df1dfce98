//! In-memory delivery queue with a single worker
//!
//! Jobs are attempted one at a time in FIFO order. A job whose attempt fails
//! with a transient error goes to the back of the queue until its retry
//! budget is spent; anything else ends in `Delivered` or `Dropped`.
//!
//! At most one worker runs at a time. `kick` starts one only when a
//! compare-and-swap on the active flag succeeds, and the worker clears the
//! flag through a guard on every exit path.

use crate::error::{MailError, MailResult};
use crate::job::{EmailJob, JobState};
use crate::metrics::MailMetrics;
use crate::provider::{EmailContent, SentEmail};
use crate::templates::{TemplateKind, TemplateRenderer};
use crate::transport::TransportProvider;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Delivery queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Failed attempts allowed before a job is dropped
    pub max_retries: u32,
    /// Upper bound on one attempt, connection setup included
    pub send_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            send_timeout: Duration::from_secs(15),
        }
    }
}

impl QueueConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// A job changed state.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEvent {
    pub job_id: Uuid,
    pub recipient: String,
    pub template: TemplateKind,
    /// Attempt the transition belongs to, starting at 1
    pub attempt: u32,
    pub state: JobState,
    pub error: Option<String>,
}

impl DeliveryEvent {
    fn new(job: &EmailJob, state: JobState, error: Option<String>) -> Self {
        Self {
            job_id: job.id,
            recipient: job.recipient.clone(),
            template: job.kind(),
            attempt: job.attempt(),
            state,
            error,
        }
    }
}

struct Inner {
    config: QueueConfig,
    jobs: Mutex<VecDeque<EmailJob>>,
    worker_active: AtomicBool,
    workers_started: AtomicU64,
    renderer: Arc<TemplateRenderer>,
    transport: Arc<TransportProvider>,
    events: broadcast::Sender<DeliveryEvent>,
    idle: Notify,
    metrics: MailMetrics,
    runtime: Handle,
}

/// Cloneable handle to the shared queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    /// Create a queue. Workers are spawned on the runtime current at this call.
    pub fn new(
        config: QueueConfig,
        renderer: Arc<TemplateRenderer>,
        transport: Arc<TransportProvider>,
        metrics: MailMetrics,
    ) -> MailResult<Self> {
        let runtime = Handle::try_current().map_err(|e| MailError::Runtime(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                jobs: Mutex::new(VecDeque::new()),
                worker_active: AtomicBool::new(false),
                workers_started: AtomicU64::new(0),
                renderer,
                transport,
                events,
                idle: Notify::new(),
                metrics,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Append a job and make sure a worker will see it.
    pub fn push(&self, job: EmailJob) {
        self.inner.push_back(job);
        self.kick();
    }

    /// Start a worker unless one is already running.
    pub fn kick(&self) {
        if self.inner.try_activate() {
            self.inner.workers_started.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(run_worker(inner));
        }
    }

    /// Jobs waiting to be attempted, not counting the one in flight.
    pub fn len(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_worker_active(&self) -> bool {
        self.inner.worker_active.load(Ordering::SeqCst)
    }

    /// Workers spawned by `kick` since the queue was created
    pub fn workers_started(&self) -> u64 {
        self.inner.workers_started.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once no job is pending and no worker is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Clears the active flag when the worker loop exits, however it exits.
struct ActiveGuard<'a>(&'a Inner);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.worker_active.store(false, Ordering::SeqCst);
        self.0.idle.notify_waiters();
    }
}

async fn run_worker(inner: Arc<Inner>) {
    debug!("Email worker started");

    loop {
        {
            let _active = ActiveGuard(&inner);
            while let Some(job) = inner.pop_front() {
                inner.process_guarded(job).await;
            }
        }

        // A push that raced the guard saw the flag still set and skipped its
        // kick, so look once more before exiting.
        if inner.jobs.lock().is_empty() || !inner.try_activate() {
            break;
        }
    }

    debug!("Email worker idle");
}

impl Inner {
    fn try_activate(&self) -> bool {
        self.worker_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_idle(&self) -> bool {
        !self.worker_active.load(Ordering::SeqCst) && self.jobs.lock().is_empty()
    }

    fn push_back(&self, job: EmailJob) {
        let depth = {
            let mut jobs = self.jobs.lock();
            jobs.push_back(job);
            jobs.len()
        };
        self.metrics.queue_depth(depth);
    }

    fn pop_front(&self) -> Option<EmailJob> {
        let mut jobs = self.jobs.lock();
        let job = jobs.pop_front();
        self.metrics.queue_depth(jobs.len());
        job
    }

    fn emit(&self, event: DeliveryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Process one job, turning a panic into a dropped job.
    async fn process_guarded(&self, job: EmailJob) {
        let dropped = DeliveryEvent::new(&job, JobState::Dropped, None);

        if AssertUnwindSafe(self.process(job))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(
                job_id = %dropped.job_id,
                recipient = %dropped.recipient,
                template = %dropped.template,
                "Email worker panicked, dropping job"
            );
            self.metrics.job_dropped(dropped.template, "panic");
            self.emit(DeliveryEvent {
                error: Some("worker panicked".to_string()),
                ..dropped
            });
        }
    }

    async fn process(&self, mut job: EmailJob) {
        let kind = job.kind();
        let attempt = job.attempt();

        self.emit(DeliveryEvent::new(&job, JobState::InFlight, None));
        self.metrics.attempt_started(kind);
        debug!(
            job_id = %job.id,
            recipient = %job.recipient,
            template = %kind,
            attempt,
            "Sending email"
        );

        let started = Instant::now();
        match self.deliver(&job).await {
            Ok(sent) => {
                self.metrics.job_delivered(kind, started.elapsed());
                info!(
                    job_id = %job.id,
                    recipient = %job.recipient,
                    template = %kind,
                    attempt,
                    message_id = ?sent.message_id,
                    "Email sent successfully"
                );
                self.emit(DeliveryEvent::new(&job, JobState::Delivered, None));
            }
            Err(e) if e.is_retryable() && job.can_retry(self.config.max_retries) => {
                warn!(
                    job_id = %job.id,
                    recipient = %job.recipient,
                    template = %kind,
                    attempt,
                    error = %e,
                    "Email delivery failed, retrying later"
                );
                self.metrics.job_retried(kind);
                self.emit(DeliveryEvent::new(
                    &job,
                    JobState::Pending,
                    Some(e.to_string()),
                ));

                job.retry_count += 1;
                self.push_back(job);
            }
            Err(e) => {
                let category = e.category();
                error!(
                    job_id = %job.id,
                    recipient = %job.recipient,
                    template = %kind,
                    attempt,
                    category = category.as_str(),
                    error = %e,
                    "Failed to send email, dropping job"
                );
                self.metrics.job_dropped(kind, category.as_str());
                self.emit(DeliveryEvent::new(
                    &job,
                    JobState::Dropped,
                    Some(e.to_string()),
                ));
            }
        }
    }

    /// Render, then connect and send inside one timeout window.
    ///
    /// On timeout the send future is dropped, which cancels it. Nothing it
    /// would have produced can reach the job afterwards.
    async fn deliver(&self, job: &EmailJob) -> MailResult<SentEmail> {
        let rendered = self.renderer.render(&job.template).await?;
        let content = EmailContent {
            to_email: job.recipient.clone(),
            subject: rendered.subject.to_string(),
            html_body: rendered.body.to_string(),
        };

        let send = async {
            let connection = self.transport.get_connection().await?;
            connection.send(&content).await
        };

        tokio::time::timeout(self.config.send_timeout, send)
            .await
            .map_err(|_| MailError::DeliveryTimeout(self.config.send_timeout))?
    }
}
