//! Redis-backed delayed job queue.
//!
//! # Key Patterns
//!
//! - `{queue}:job:{job_id}` - Job hash (`name`, `data`, `opts`, `timestamp`, `delay`)
//! - `{queue}:delayed` - Sorted set of job ids scored by due time (epoch ms)
//!
//! The email worker promotes due members of the delayed set and applies the
//! retention limits stored in `opts`.
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently, so
//! each operation clones it instead of locking.

use crate::delivery::{EndNotificationJob, EnqueueOutcome, JobOptions, JobQueue};
use crate::errors::PsError;
use crate::observability::metrics::record_redis_latency;
use crate::redis::lua_scripts;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Job options as stored alongside the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredJobOptions<'a> {
    job_id: &'a str,
    /// Milliseconds.
    delay: u64,
    remove_on_complete: u32,
    remove_on_fail: u32,
}

impl<'a> From<&'a JobOptions> for StoredJobOptions<'a> {
    fn from(options: &'a JobOptions) -> Self {
        Self {
            job_id: &options.job_id,
            delay: duration_ms(options),
            remove_on_complete: options.keep_completed,
            remove_on_fail: options.keep_failed,
        }
    }
}

fn duration_ms(options: &JobOptions) -> u64 {
    u64::try_from(options.delay.as_millis()).unwrap_or(u64::MAX)
}

/// Delayed job queue on Redis.
#[derive(Clone)]
pub struct RedisJobQueue {
    connection: MultiplexedConnection,
    queue_name: String,
    enqueue_script: Script,
}

impl RedisJobQueue {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `PsError::Redis` if the client cannot be opened or connected.
    pub async fn connect(redis_url: &str, queue_name: impl Into<String>) -> Result<Self, PsError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Never log redis_url: it may carry credentials
            error!(
                target: "ps.redis.queue",
                error = %e,
                "Failed to open Redis client"
            );
            PsError::Redis(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "ps.redis.queue",
                    error = %e,
                    "Failed to connect to Redis"
                );
                PsError::Redis(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            queue_name: queue_name.into(),
            enqueue_script: Script::new(lua_scripts::ENQUEUE_DELAYED_JOB),
        })
    }

    /// Round-trip a PING (readiness check).
    pub async fn ping(&self) -> Result<(), PsError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| PsError::Redis(format!("PING failed: {e}")))?;
        record_redis_latency("ping", start.elapsed());
        Ok(())
    }

    #[must_use]
    pub fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{job_id}", self.queue_name)
    }

    #[must_use]
    pub fn delayed_key(&self) -> String {
        format!("{}:delayed", self.queue_name)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip_all, fields(event_id = job.event_id, job_id = %options.job_id))]
    async fn enqueue(
        &self,
        job: &EndNotificationJob,
        options: &JobOptions,
    ) -> Result<EnqueueOutcome, PsError> {
        let data = serde_json::to_string(job)?;
        let opts = serde_json::to_string(&StoredJobOptions::from(options))?;
        let timestamp = chrono::Utc::now().timestamp_millis();

        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: i64 = self
            .enqueue_script
            .key(self.job_key(&options.job_id))
            .key(self.delayed_key())
            .arg(&options.job_id)
            .arg(crate::delivery::JOB_NAME)
            .arg(&data)
            .arg(&opts)
            .arg(timestamp)
            .arg(duration_ms(options))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(
                    target: "ps.redis.queue",
                    error = %e,
                    event_id = job.event_id,
                    "Failed to enqueue job"
                );
                PsError::Redis(format!("Failed to enqueue job: {e}"))
            })?;
        record_redis_latency("enqueue_job", start.elapsed());

        match result {
            1 => {
                debug!(
                    target: "ps.redis.queue",
                    event_id = job.event_id,
                    job_id = %options.job_id,
                    "Job enqueued"
                );
                Ok(EnqueueOutcome::Enqueued)
            }
            0 => Ok(EnqueueOutcome::Duplicate),
            other => Err(PsError::Redis(format!(
                "Enqueue script returned unexpected value: {other}"
            ))),
        }
    }
}
