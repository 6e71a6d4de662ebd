//! In-app notification record written for the host.

use crate::protocol::EventId;

use serde::Serialize;

/// `notification_type` of every record written here.
pub const NOTIFICATION_TYPE_SYSTEM: &str = "system";

const EVENT_ENDED_TITLE: &str = "Your live event has ended";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMetadata {
    pub event_id: EventId,
}

/// Notification row for the host's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InAppNotification {
    pub user_id: i64,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub link: String,
    pub metadata: NotificationMetadata,
}

impl InAppNotification {
    /// Record telling `host_id` that every viewer has left `event_name`.
    #[must_use]
    pub fn event_ended(host_id: i64, event_id: EventId, event_name: &str, link_base: &str) -> Self {
        Self {
            user_id: host_id,
            notification_type: NOTIFICATION_TYPE_SYSTEM.to_string(),
            title: EVENT_ENDED_TITLE.to_string(),
            message: format!(
                "All viewers have left \"{event_name}\". The stream is now considered ended."
            ),
            link: format!("{}/{event_id}", link_base.trim_end_matches('/')),
            metadata: NotificationMetadata { event_id },
        }
    }
}
