//! Read-only occupancy endpoints.
//!
//! - `GET /stats` - `{rooms, connections, armed_timers}`
//! - `GET /stats/rooms/:event_id` - `{eventId, size}`

use crate::protocol::EventId;
use crate::ws::GatewayState;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsResponse {
    pub rooms: usize,
    pub connections: usize,
    pub armed_timers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSizeResponse {
    pub event_id: EventId,
    pub size: usize,
}

pub(crate) async fn stats_handler(
    State(state): State<GatewayState>,
) -> Result<Json<StatsResponse>, StatusCode> {
    let status = state.presence.get_status().await.map_err(|e| {
        warn!(target: "ps.ws", error = %e, "Stats unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(StatsResponse {
        rooms: status.rooms,
        connections: status.connections,
        armed_timers: status.armed_timers,
    }))
}

pub(crate) async fn room_size_handler(
    State(state): State<GatewayState>,
    Path(event_id): Path<EventId>,
) -> Result<Json<RoomSizeResponse>, StatusCode> {
    let size = state.presence.room_size(event_id).await.map_err(|e| {
        warn!(target: "ps.ws", error = %e, event_id = event_id, "Room size unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(RoomSizeResponse { event_id, size }))
}
