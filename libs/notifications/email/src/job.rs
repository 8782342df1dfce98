//! EmailJob - one queued request to deliver a single email

use crate::templates::{EmailTemplate, TemplateKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a job sits in its delivery lifecycle.
///
/// ```text
/// Pending ──> InFlight ──> Delivered
///    ^           │
///    └───────────┤ (transient failure, retries left)
///                └──> Dropped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue
    Pending,
    /// Being attempted by the worker
    InFlight,
    /// Accepted by the transport
    Delivered,
    /// Given up on
    Dropped,
}

impl JobState {
    /// `Delivered` and `Dropped` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Delivered | JobState::Dropped)
    }
}

/// Email job owned by the delivery queue while pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    /// Unique job ID (UUID v7, time-ordered with a random tail)
    pub id: Uuid,

    /// Recipient email address
    pub recipient: String,

    /// Template kind together with its props
    pub template: EmailTemplate,

    /// Failed attempts so far
    #[serde(default)]
    pub retry_count: u32,

    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
}

impl EmailJob {
    /// Create a new EmailJob
    pub fn new(recipient: impl Into<String>, template: EmailTemplate) -> Self {
        Self {
            id: Uuid::now_v7(),
            recipient: recipient.into(),
            template,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> TemplateKind {
        self.template.kind()
    }

    /// 1-based number of the attempt currently being made.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }
}
