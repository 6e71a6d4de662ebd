//! Delivery scheduler: turns an end-of-stream signal into host notifications.
//!
//! On each accepted signal the scheduler:
//!
//! 1. Looks up the event and its host through [`EventDirectory`]. A missing
//!    record or a failed lookup drops the signal (logged, not retried).
//! 2. Enqueues a delayed [`EndNotificationJob`] on the [`JobQueue`] and
//!    writes an [`InAppNotification`] through the [`NotificationStore`].
//!
//! The two writes in step 2 run concurrently and independently. There is no
//! two-phase commit: each failure is logged and counted on its own, and an
//! in-app failure never blocks or retries the email job.
//!
//! The job id is `event_end_notification:{event_id}:{generation}`, so a
//! duplicate enqueue for the same end-of-stream cycle is a no-op at the
//! broker, while a later cycle for the same event gets a fresh job.

pub mod job;
pub mod notification;

pub use job::{EndNotificationJob, EnqueueOutcome, JobOptions, JOB_NAME};
pub use notification::{InAppNotification, NotificationMetadata};

use crate::detector::EndOfStreamSignal;
use crate::errors::PsError;
use crate::observability::metrics::record_delivery;
use crate::protocol::EventId;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Event record as needed for notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    pub event_id: EventId,
    pub name: String,
    pub host_id: Option<i64>,
}

/// Host (user) record as needed for notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub id: i64,
    pub email: String,
}

/// Read-only lookup of event and host records.
#[async_trait]
pub trait EventDirectory: Send + Sync {
    async fn find_event(&self, event_id: EventId) -> Result<Option<EventSummary>, PsError>;

    async fn find_host(&self, host_id: i64) -> Result<Option<HostRecord>, PsError>;
}

/// Durable delayed-job broker.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job: &EndNotificationJob,
        options: &JobOptions,
    ) -> Result<EnqueueOutcome, PsError>;
}

/// Append-only notification store.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: &InAppNotification) -> Result<(), PsError>;
}

/// Consumer of accepted end-of-stream signals.
///
/// Invoked on a spawned task, never on the presence actor loop.
#[async_trait]
pub trait EndOfStreamHandler: Send + Sync {
    async fn on_end_of_stream(&self, signal: EndOfStreamSignal);
}

/// Scheduling and retention settings shared by every delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Job delay; equal to the debounce window.
    pub delay: Duration,
    pub keep_completed: u32,
    pub keep_failed: u32,
    /// Prefix of the in-app notification link.
    pub link_base: String,
}

/// Outcome of one delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Success,
    /// Job already present for this cycle.
    Duplicate,
    Failed,
}

impl ChannelStatus {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Success => "success",
            ChannelStatus::Duplicate => "duplicate",
            ChannelStatus::Failed => "error",
        }
    }
}

/// Why a signal was dropped before any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    EventNotFound,
    /// The event has no host assigned.
    NoHost,
    HostNotFound,
    LookupFailed,
}

/// Result of [`DeliveryScheduler::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReport {
    Dropped(DropReason),
    Attempted {
        email_job: ChannelStatus,
        in_app: ChannelStatus,
    },
}

/// Converts end-of-stream signals into a durable job plus an in-app record.
pub struct DeliveryScheduler {
    directory: Arc<dyn EventDirectory>,
    queue: Arc<dyn JobQueue>,
    notifications: Arc<dyn NotificationStore>,
    settings: DeliverySettings,
}

impl DeliveryScheduler {
    #[must_use]
    pub fn new(
        directory: Arc<dyn EventDirectory>,
        queue: Arc<dyn JobQueue>,
        notifications: Arc<dyn NotificationStore>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            directory,
            queue,
            notifications,
            settings,
        }
    }

    /// Deliver notifications for one accepted signal.
    #[instrument(
        skip_all,
        name = "ps.delivery",
        fields(event_id = signal.event_id, generation = signal.generation)
    )]
    pub async fn deliver(&self, signal: EndOfStreamSignal) -> DeliveryReport {
        let (event, host) = match self.lookup(signal.event_id).await {
            Ok(found) => found,
            Err(reason) => {
                record_delivery("email_job", "dropped");
                record_delivery("in_app", "dropped");
                return DeliveryReport::Dropped(reason);
            }
        };

        let job = EndNotificationJob {
            event_id: event.event_id,
            event_name: event.name.clone(),
            host_email: host.email,
            host_id: host.id,
        };
        let options = JobOptions {
            delay: self.settings.delay,
            keep_completed: self.settings.keep_completed,
            keep_failed: self.settings.keep_failed,
            job_id: JobOptions::job_id_for(signal.event_id, signal.generation),
        };
        let record = InAppNotification::event_ended(
            host.id,
            event.event_id,
            &event.name,
            &self.settings.link_base,
        );

        let (job_result, record_result) = tokio::join!(
            self.queue.enqueue(&job, &options),
            self.notifications.create(&record)
        );

        let email_job = match job_result {
            Ok(EnqueueOutcome::Enqueued) => {
                info!(
                    target: "ps.delivery",
                    event_id = signal.event_id,
                    job_id = %options.job_id,
                    delay_secs = options.delay.as_secs(),
                    "End-of-event email job scheduled"
                );
                ChannelStatus::Success
            }
            Ok(EnqueueOutcome::Duplicate) => {
                info!(
                    target: "ps.delivery",
                    event_id = signal.event_id,
                    job_id = %options.job_id,
                    "End-of-event email job already scheduled for this cycle"
                );
                ChannelStatus::Duplicate
            }
            Err(e) => {
                error!(
                    target: "ps.delivery",
                    event_id = signal.event_id,
                    job_id = %options.job_id,
                    error = %e,
                    "Failed to enqueue end-of-event email job"
                );
                ChannelStatus::Failed
            }
        };

        let in_app = match record_result {
            Ok(()) => ChannelStatus::Success,
            Err(e) => {
                warn!(
                    target: "ps.delivery",
                    event_id = signal.event_id,
                    error = %e,
                    "Failed to create in-app notification"
                );
                ChannelStatus::Failed
            }
        };

        record_delivery("email_job", email_job.as_str());
        record_delivery("in_app", in_app.as_str());

        DeliveryReport::Attempted { email_job, in_app }
    }

    async fn lookup(&self, event_id: EventId) -> Result<(EventSummary, HostRecord), DropReason> {
        let event = match self.directory.find_event(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(
                    target: "ps.delivery",
                    event_id = event_id,
                    "Event not found, dropping end-of-stream notification"
                );
                return Err(DropReason::EventNotFound);
            }
            Err(e) => {
                error!(
                    target: "ps.delivery",
                    event_id = event_id,
                    error = %e,
                    "Event lookup failed, dropping end-of-stream notification"
                );
                return Err(DropReason::LookupFailed);
            }
        };

        let Some(host_id) = event.host_id else {
            warn!(
                target: "ps.delivery",
                event_id = event_id,
                "Event has no host, dropping end-of-stream notification"
            );
            return Err(DropReason::NoHost);
        };

        match self.directory.find_host(host_id).await {
            Ok(Some(host)) => Ok((event, host)),
            Ok(None) => {
                warn!(
                    target: "ps.delivery",
                    event_id = event_id,
                    host_id = host_id,
                    "Host not found, dropping end-of-stream notification"
                );
                Err(DropReason::HostNotFound)
            }
            Err(e) => {
                error!(
                    target: "ps.delivery",
                    event_id = event_id,
                    host_id = host_id,
                    error = %e,
                    "Host lookup failed, dropping end-of-stream notification"
                );
                Err(DropReason::LookupFailed)
            }
        }
    }
}

#[async_trait]
impl EndOfStreamHandler for DeliveryScheduler {
    async fn on_end_of_stream(&self, signal: EndOfStreamSignal) {
        self.deliver(signal).await;
    }
}
