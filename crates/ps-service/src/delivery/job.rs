//! Durable end-of-event notification job.

use crate::protocol::EventId;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job name understood by the email worker.
pub const JOB_NAME: &str = "event_end_notification";

/// Payload of the delayed email job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndNotificationJob {
    pub event_id: EventId,
    pub event_name: String,
    pub host_email: String,
    pub host_id: i64,
}

/// Scheduling and retention options for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Delay before the job becomes runnable.
    pub delay: Duration,
    /// Completed jobs retained by the worker.
    pub keep_completed: u32,
    /// Failed jobs retained by the worker.
    pub keep_failed: u32,
    /// Idempotency key; a second enqueue with the same id is a no-op.
    pub job_id: String,
}

impl JobOptions {
    /// Job id for one end-of-stream cycle of an event.
    #[must_use]
    pub fn job_id_for(event_id: EventId, generation: u64) -> String {
        format!("{JOB_NAME}:{event_id}:{generation}")
    }
}

/// Result of an enqueue that reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id already exists.
    Duplicate,
}
