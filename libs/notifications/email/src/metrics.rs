//! Delivery metrics
//!
//! Emitted through the `metrics` facade. Installing an exporter is left to
//! the binary; without one every call is a no-op.

use crate::templates::TemplateKind;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Mail queue metrics helper
#[derive(Clone)]
pub struct MailMetrics {
    /// Queue name for labeling
    queue_name: String,
}

impl MailMetrics {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }

    /// Record a job being accepted
    pub fn job_enqueued(&self, template: TemplateKind) {
        counter!(
            "email_jobs_enqueued_total",
            "queue" => self.queue_name.clone(),
            "template" => template.name()
        )
        .increment(1);
    }

    /// Record a send attempt starting
    pub fn attempt_started(&self, template: TemplateKind) {
        counter!(
            "email_delivery_attempts_total",
            "queue" => self.queue_name.clone(),
            "template" => template.name()
        )
        .increment(1);
    }

    /// Record a job being delivered
    pub fn job_delivered(&self, template: TemplateKind, duration: Duration) {
        counter!(
            "email_jobs_delivered_total",
            "queue" => self.queue_name.clone(),
            "template" => template.name()
        )
        .increment(1);

        histogram!(
            "email_delivery_duration_seconds",
            "queue" => self.queue_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job being sent to the back of the queue
    pub fn job_retried(&self, template: TemplateKind) {
        counter!(
            "email_jobs_retried_total",
            "queue" => self.queue_name.clone(),
            "template" => template.name()
        )
        .increment(1);
    }

    /// Record a job being given up on
    pub fn job_dropped(&self, template: TemplateKind, category: &str) {
        counter!(
            "email_jobs_dropped_total",
            "queue" => self.queue_name.clone(),
            "template" => template.name(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    /// Update queue depth gauge
    pub fn queue_depth(&self, depth: usize) {
        gauge!(
            "email_queue_depth",
            "queue" => self.queue_name.clone()
        )
        .set(depth as f64);
    }

    pub fn cache_cleared(&self) {
        counter!(
            "email_template_cache_clears_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }
}

impl Default for MailMetrics {
    fn default() -> Self {
        Self::new("email")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = MailMetrics::default();
        assert_eq!(metrics.queue_name, "email");
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = MailMetrics::new("test");
        metrics.job_enqueued(TemplateKind::EmailOtpVerification);
        metrics.attempt_started(TemplateKind::EmailOtpVerification);
        metrics.job_delivered(TemplateKind::EmailOtpVerification, Duration::from_millis(20));
        metrics.job_dropped(TemplateKind::PasswordResetLink, "transient");
        metrics.queue_depth(3);
        metrics.cache_cleared();
    }
}
