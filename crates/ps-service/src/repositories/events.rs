//! Event and host lookup against Postgres.
//!
//! Read-only: the presence service never writes event or user rows.

use crate::delivery::{EventDirectory, EventSummary, HostRecord};
use crate::errors::PsError;
use crate::observability::metrics::record_db_query;
use crate::protocol::EventId;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::{debug, instrument};

/// `EventDirectory` over the `events` and `users` tables.
#[derive(Clone)]
pub struct PgEventDirectory {
    pool: PgPool,
}

impl PgEventDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDirectory for PgEventDirectory {
    #[instrument(skip_all, name = "ps.repo.find_event", fields(event_id = event_id))]
    async fn find_event(&self, event_id: EventId) -> Result<Option<EventSummary>, PsError> {
        let start = Instant::now();

        let row = sqlx::query(
            r#"
            SELECT id, name, host_id
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            record_db_query("find_event", "error", start.elapsed());
            PsError::Database(e.to_string())
        })?;

        record_db_query("find_event", "success", start.elapsed());

        let Some(row) = row else {
            debug!(target: "ps.repository", event_id = event_id, "Event row not found");
            return Ok(None);
        };

        Ok(Some(EventSummary {
            event_id: row.try_get("id")?,
            name: row.try_get("name")?,
            host_id: row.try_get("host_id")?,
        }))
    }

    #[instrument(skip_all, name = "ps.repo.find_host", fields(host_id = host_id))]
    async fn find_host(&self, host_id: i64) -> Result<Option<HostRecord>, PsError> {
        let start = Instant::now();

        let row = sqlx::query(
            r#"
            SELECT id, email
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            record_db_query("find_host", "error", start.elapsed());
            PsError::Database(e.to_string())
        })?;

        record_db_query("find_host", "success", start.elapsed());

        row.map(|row| -> Result<HostRecord, PsError> {
            Ok(HostRecord {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
            })
        })
        .transpose()
    }
}
