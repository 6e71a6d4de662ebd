//! In-memory delayed job queue.
//!
//! Mirrors the broker's id semantics: the first enqueue of a job id stores
//! the job, later ones with the same id report `Duplicate` and store nothing.

use async_trait::async_trait;
use ps_service::delivery::{EndNotificationJob, EnqueueOutcome, JobOptions, JobQueue};
use ps_service::errors::PsError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A job accepted by the mock queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: EndNotificationJob,
    pub options: JobOptions,
}

/// Mock `JobQueue` for delivery tests.
#[derive(Debug, Clone, Default)]
pub struct MockJobQueue {
    inner: Arc<Mutex<MockQueueInner>>,
    call_count: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct MockQueueInner {
    jobs: Vec<QueuedJob>,
    ids: HashSet<String>,
    fail: bool,
}

impl MockJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue whose enqueues all fail.
    #[must_use]
    pub fn failing() -> Self {
        let queue = Self::new();
        queue.inner.lock().unwrap().fail = true;
        queue
    }

    /// Jobs stored so far, in enqueue order.
    #[must_use]
    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.inner.lock().unwrap().jobs.clone()
    }

    /// Number of `enqueue` calls, duplicates and failures included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(
        &self,
        job: &EndNotificationJob,
        options: &JobOptions,
    ) -> Result<EnqueueOutcome, PsError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(PsError::Redis("mock queue failure".to_string()));
        }
        if !inner.ids.insert(options.job_id.clone()) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        inner.jobs.push(QueuedJob {
            job: job.clone(),
            options: options.clone(),
        });
        Ok(EnqueueOutcome::Enqueued)
    }
}
