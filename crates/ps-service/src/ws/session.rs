//! Per-connection session state.
//!
//! A session starts unjoined. The first valid `time_sync` joins it to that
//! message's event; later `time_sync` messages for the same event are
//! liveness only. A rejected join queues `event_ended` plus a close frame,
//! after which the writer task ends the socket.

use crate::actors::PresenceActorHandle;
use crate::errors::PsError;
use crate::protocol::{
    try_deliver, ClientMessage, ConnectionId, ConnectionSink, EventId, OutboundFrame,
    TimeSyncRequest, CLOSE_NORMAL, EVENT_ALREADY_ENDED_MESSAGE,
};
use crate::registry::{ConnectionMeta, JoinOutcome, JoinRejection};

use tracing::{debug, info, warn};

/// State of one viewer connection, driven by the socket reader.
pub struct ConnectionSession {
    connection_id: ConnectionId,
    presence: PresenceActorHandle,
    sink: ConnectionSink,
    joined: Option<EventId>,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(connection_id: ConnectionId, presence: PresenceActorHandle, sink: ConnectionSink) -> Self {
        Self {
            connection_id,
            presence,
            sink,
            joined: None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Event this connection joined, if any.
    #[must_use]
    pub fn joined_event(&self) -> Option<EventId> {
        self.joined
    }

    /// Handle one inbound text frame. Malformed frames are logged and ignored.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::TimeSync(request)) => self.handle_time_sync(request).await,
            Err(e) => {
                warn!(
                    target: "ps.ws",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Ignoring malformed message"
                );
            }
        }
    }

    async fn handle_time_sync(&mut self, request: TimeSyncRequest) {
        match self.joined {
            Some(event_id) if event_id == request.event_id => {
                debug!(
                    target: "ps.ws",
                    connection_id = %self.connection_id,
                    event_id = event_id,
                    "time_sync from joined connection"
                );
            }
            Some(event_id) => {
                warn!(
                    target: "ps.ws",
                    connection_id = %self.connection_id,
                    event_id = event_id,
                    requested_event_id = request.event_id,
                    "Ignoring time_sync for a different event"
                );
            }
            None => self.join(request).await,
        }
    }

    async fn join(&mut self, request: TimeSyncRequest) {
        let meta = ConnectionMeta {
            event_start_time: request.event_start_time,
            event_end_time: request.event_end_time,
        };

        let result = self
            .presence
            .join(
                self.connection_id.clone(),
                request.event_id,
                meta,
                self.sink.clone(),
            )
            .await;

        match result {
            Ok(JoinOutcome::Joined { .. }) => {
                self.joined = Some(request.event_id);
            }
            Ok(JoinOutcome::Rejected(JoinRejection::EventEnded)) => {
                info!(
                    target: "ps.ws",
                    connection_id = %self.connection_id,
                    event_id = request.event_id,
                    "Closing connection to an event that has already ended"
                );
                for frame in OutboundFrame::event_ended(request.event_id, EVENT_ALREADY_ENDED_MESSAGE) {
                    try_deliver(&self.sink, frame);
                }
            }
            Ok(JoinOutcome::Rejected(JoinRejection::DuplicateConnection)) => {
                self.close(&PsError::DuplicateConnection(self.connection_id.clone()));
            }
            Err(e) => {
                self.close(&e);
            }
        }
    }

    fn close(&self, error: &PsError) {
        warn!(
            target: "ps.ws",
            connection_id = %self.connection_id,
            error = %error,
            "Closing connection"
        );
        try_deliver(
            &self.sink,
            OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: error.close_reason().to_string(),
            },
        );
    }

    /// Report the closed connection to the presence actor.
    pub async fn finish(self) {
        if self.joined.is_none() {
            return;
        }
        if let Err(e) = self.presence.leave(self.connection_id.clone()).await {
            debug!(
                target: "ps.ws",
                connection_id = %self.connection_id,
                error = %e,
                "Leave not delivered"
            );
        }
    }
}
