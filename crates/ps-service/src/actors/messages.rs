//! Messages accepted by the presence actor.

use crate::protocol::{ConnectionId, ConnectionSink, EventId};
use crate::registry::{ConnectionMeta, JoinOutcome};

use tokio::sync::oneshot;

/// Presence actor mailbox message.
#[derive(Debug)]
pub enum PresenceMessage {
    /// Register a connection in an event room.
    Join {
        connection_id: ConnectionId,
        event_id: EventId,
        meta: ConnectionMeta,
        sink: ConnectionSink,
        respond_to: oneshot::Sender<JoinOutcome>,
    },

    /// Connection closed. Fire-and-forget.
    Leave { connection_id: ConnectionId },

    RoomSize {
        event_id: EventId,
        respond_to: oneshot::Sender<usize>,
    },

    TotalConnections { respond_to: oneshot::Sender<usize> },

    GetStatus {
        respond_to: oneshot::Sender<PresenceStatus>,
    },
}

/// Snapshot of presence actor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStatus {
    pub rooms: usize,
    pub connections: usize,
    pub armed_timers: usize,
    pub mailbox_depth: usize,
}
