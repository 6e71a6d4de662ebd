//! WebSocket gateway and occupancy endpoints.
//!
//! Each viewer socket is split into:
//! - a reader loop driving a [`ConnectionSession`]
//! - a writer task draining the connection's bounded outbound queue
//!
//! The presence actor only ever holds the sending half of that queue, so a
//! slow viewer costs dropped frames, never a blocked actor. A close frame
//! queued by anyone ends the writer, which in turn ends the reader.

pub mod session;
pub mod stats;

pub use session::ConnectionSession;
pub use stats::{RoomSizeResponse, StatsResponse};

use crate::actors::PresenceActorHandle;
use crate::clock::Clock;
use crate::protocol::{try_deliver, OutboundFrame, ServerMessage};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Outbound frames buffered per connection before frames are dropped.
pub const OUTBOUND_BUFFER: usize = 64;

/// Shared state of the gateway router.
#[derive(Clone)]
pub struct GatewayState {
    pub presence: PresenceActorHandle,
    pub clock: Arc<dyn Clock>,
}

/// Router serving `/ws`, `/stats` and `/stats/rooms/:event_id`.
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/stats", get(stats::stats_handler))
        .route("/stats/rooms/:event_id", get(stats::room_size_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, name = "ps.ws.connection", fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("connection_id", connection_id.as_str());

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sink, mut outbound) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                OutboundFrame::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(target: "ps.ws", error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Owned(reason),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    try_deliver(
        &sink,
        OutboundFrame::Message(ServerMessage::Connected {
            client_id: connection_id.clone(),
            timestamp: state.clock.now_ms(),
        }),
    );

    let mut session = ConnectionSession::new(connection_id, state.presence.clone(), sink);

    loop {
        tokio::select! {
            _ = &mut writer => {
                // Close frame sent or socket write failed
                break;
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => {
                        warn!(
                            target: "ps.ws",
                            connection_id = %session.connection_id(),
                            "Ignoring binary frame"
                        );
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "ps.ws",
                            connection_id = %session.connection_id(),
                            error = %e,
                            "Socket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    debug!(
        target: "ps.ws",
        connection_id = %session.connection_id(),
        event_id = ?session.joined_event(),
        "Connection closed"
    );
    session.finish().await;
    writer.abort();
}
