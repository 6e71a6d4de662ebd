//! In-app notification writes.

use crate::delivery::{InAppNotification, NotificationStore};
use crate::errors::PsError;
use crate::observability::metrics::record_db_query;

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{debug, instrument};

/// `NotificationStore` over the `notifications` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(
        skip_all,
        name = "ps.repo.create_notification",
        fields(user_id = notification.user_id, event_id = notification.metadata.event_id)
    )]
    async fn create(&self, notification: &InAppNotification) -> Result<(), PsError> {
        let metadata = serde_json::to_string(&notification.metadata)?;
        let start = Instant::now();

        // metadata is bound as text and cast to jsonb
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (
                user_id, notification_type, title, message, link, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6::jsonb, NOW())
            "#,
        )
        .bind(notification.user_id)
        .bind(&notification.notification_type)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.link)
        .bind(metadata)
        .execute(&self.pool)
        .await;

        let status = if result.is_ok() { "success" } else { "error" };
        record_db_query("create_notification", status, start.elapsed());

        result?;

        debug!(
            target: "ps.repository",
            user_id = notification.user_id,
            event_id = notification.metadata.event_id,
            "In-app notification created"
        );

        Ok(())
    }
}
