//! Presence service error types.
//!
//! Viewers never see these errors directly: the only client-visible terminal
//! path is the `event_ended` message. `close_reason()` gives the text used in
//! a WebSocket close frame when a connection has to be dropped for an
//! internal reason. Internal details are logged server-side only.

use thiserror::Error;

/// Presence service error type.
#[derive(Debug, Error)]
pub enum PsError {
    /// Redis operation failed (job broker).
    #[error("Redis error: {0}")]
    Redis(String),

    /// Database operation failed (event, host or notification store).
    #[error("Database error: {0}")]
    Database(String),

    /// Payload could not be serialized for an external collaborator.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection id is already registered in a room.
    #[error("Connection already registered: {0}")]
    DuplicateConnection(String),

    /// The presence actor is shutting down or gone.
    #[error("Presence actor is shutting down")]
    ShuttingDown,
}

impl PsError {
    /// Returns a client-safe close reason (no internal details).
    #[must_use]
    pub fn close_reason(&self) -> &'static str {
        match self {
            PsError::ShuttingDown => "Server shutting down",
            PsError::DuplicateConnection(_) => "Connection already registered",
            PsError::Redis(_) | PsError::Database(_) | PsError::Serialization(_) => {
                "Internal error"
            }
        }
    }
}

impl From<sqlx::Error> for PsError {
    fn from(err: sqlx::Error) -> Self {
        PsError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PsError {
    fn from(err: serde_json::Error) -> Self {
        PsError::Serialization(err.to_string())
    }
}
