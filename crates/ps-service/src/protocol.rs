//! Wire protocol for viewer connections.
//!
//! All frames are JSON text with a `type` tag:
//!
//! | Direction | `type` | Fields |
//! |-----------|--------|--------|
//! | client → server | `time_sync` | `eventId`, `currentTime` (ms), `timestamp` (ms), `eventStartTime` (ms), `eventEndTime` (ms) |
//! | server → client | `connected` | `clientId`, `timestamp` (ms) |
//! | server → client | `time_sync` | `eventId`, `currentTime` (seconds), `timestamp` (ms) |
//! | server → client | `event_ended` | `eventId`, optional `message` |
//!
//! An `event_ended` message is always followed by a normal-closure (1000)
//! close frame.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifier of a live event (room key).
pub type EventId = i64;

/// Identifier of a single viewer connection (`clientId` on the wire).
pub type ConnectionId = String;

/// WebSocket normal-closure code.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close reason sent after an `event_ended` message.
pub const EVENT_ENDED_CLOSE_REASON: &str = "Event has ended";

/// Message shown to viewers who try to join an event that is already over.
pub const EVENT_ALREADY_ENDED_MESSAGE: &str = "This event has already ended";

/// Message shown to viewers whose session is ended by the event deadline.
pub const EVENT_DEADLINE_MESSAGE: &str = "The event has reached its scheduled end time";

/// Join/heartbeat payload sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncRequest {
    pub event_id: EventId,
    #[serde(default)]
    pub current_time: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub event_start_time: i64,
    pub event_end_time: i64,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    TimeSync(TimeSyncRequest),
}

impl ClientMessage {
    /// Parse a text frame. Unknown types and missing fields are errors.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "clientId")]
        client_id: ConnectionId,
        timestamp: i64,
    },
    TimeSync {
        #[serde(rename = "eventId")]
        event_id: EventId,
        /// Server time in whole seconds.
        #[serde(rename = "currentTime")]
        current_time: i64,
        /// Server time in milliseconds.
        timestamp: i64,
    },
    EventEnded {
        #[serde(rename = "eventId")]
        event_id: EventId,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Message(ServerMessage),
    Close { code: u16, reason: String },
}

impl OutboundFrame {
    /// The two frames that terminate a viewer session for an ended event.
    #[must_use]
    pub fn event_ended(event_id: EventId, message: &str) -> [OutboundFrame; 2] {
        [
            OutboundFrame::Message(ServerMessage::EventEnded {
                event_id,
                message: Some(message.to_string()),
            }),
            OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: EVENT_ENDED_CLOSE_REASON.to_string(),
            },
        ]
    }
}

/// Sending half of a connection's outbound queue.
pub type ConnectionSink = mpsc::Sender<OutboundFrame>;

/// Queue a frame without waiting. Returns `false` if the frame was dropped
/// because the queue is full or the writer is gone.
pub fn try_deliver(sink: &ConnectionSink, frame: OutboundFrame) -> bool {
    sink.try_send(frame).is_ok()
}
