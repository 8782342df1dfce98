//! Mock email provider for testing and local runs

use super::{EmailContent, EmailProvider, SentEmail, TransportBuilder};
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};

/// What the mock does with one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Accept the message
    Deliver,
    /// Fail with `DeliveryRejected`
    Reject(String),
    /// Never settle
    Hang,
    /// Accept after a delay
    Delay(Duration),
}

/// Mock provider with scripted outcomes that records every attempt.
///
/// Outcomes are consumed in attempt order; once the script runs out the
/// default outcome applies.
pub struct MockProvider {
    script: Mutex<VecDeque<MockOutcome>>,
    default_outcome: MockOutcome,
    verify_failures: AtomicU32,
    verify_delay: Option<Duration>,
    gate: Option<Semaphore>,
    attempts: Mutex<Vec<EmailContent>>,
    delivered: Mutex<Vec<EmailContent>>,
    attempt_count: watch::Sender<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    health_checks: AtomicU32,
    builds: AtomicU32,
}

impl MockProvider {
    /// Create a mock provider that delivers everything
    pub fn new() -> Self {
        let (attempt_count, _) = watch::channel(0);
        Self {
            script: Mutex::new(VecDeque::new()),
            default_outcome: MockOutcome::Deliver,
            verify_failures: AtomicU32::new(0),
            verify_delay: None,
            gate: None,
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            attempt_count,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            health_checks: AtomicU32::new(0),
            builds: AtomicU32::new(0),
        }
    }

    /// Create a mock provider that rejects every message
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self::new().with_default(MockOutcome::Reject(reason.into()))
    }

    pub fn with_default(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Outcomes for the first attempts, in order.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..self
        }
    }

    /// Fail the first `n` verification handshakes.
    pub fn with_verify_failures(self, n: u32) -> Self {
        self.verify_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = Some(delay);
        self
    }

    /// Block every send until a permit is handed out with [`release`].
    ///
    /// [`release`]: MockProvider::release
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `n` blocked sends through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Every message handed to `send`, including failed ones
    pub async fn attempts(&self) -> Vec<EmailContent> {
        self.attempts.lock().await.clone()
    }

    pub fn attempt_count(&self) -> usize {
        *self.attempt_count.borrow()
    }

    /// Wait until at least `n` send attempts have started.
    pub async fn wait_for_attempts(&self, n: usize) {
        let mut rx = self.attempt_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Messages that were accepted
    pub async fn delivered(&self) -> Vec<EmailContent> {
        self.delivered.lock().await.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.delivered.lock().await.len()
    }

    /// Highest number of sends that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }

    /// How many times a transport was built from this mock
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailProvider for MockProvider {
    async fn send(&self, email: &EmailContent) -> MailResult<SentEmail> {
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone());

        let attempt = {
            let mut attempts = self.attempts.lock().await;
            attempts.push(email.clone());
            attempts.len()
        };
        self.attempt_count.send_replace(attempt);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| MailError::TransportUnavailable("mock gate closed".to_string()))?
                .forget();
        }

        match outcome {
            MockOutcome::Deliver => {}
            MockOutcome::Reject(reason) => return Err(MailError::DeliveryRejected(reason)),
            MockOutcome::Hang => std::future::pending::<()>().await,
            MockOutcome::Delay(delay) => tokio::time::sleep(delay).await,
        }

        self.delivered.lock().await.push(email.clone());

        Ok(SentEmail {
            message_id: Some(format!("mock-{}", attempt)),
        })
    }

    async fn health_check(&self) -> MailResult<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.verify_delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .verify_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MailError::TransportUnavailable(
                "Mock verification failed".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl TransportBuilder for Arc<MockProvider> {
    fn build(&self) -> MailResult<Arc<dyn EmailProvider>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(self) as Arc<dyn EmailProvider>)
    }
}
