//! Pre-configured test data for presence tests.
//!
//! Provides:
//! - A fixed base wall-clock time
//! - Connection metadata ending at a chosen time
//! - Outbound sinks with their receiving half
//! - Client `time_sync` frames as JSON text

use ps_service::protocol::{ConnectionSink, EventId, OutboundFrame};
use ps_service::registry::ConnectionMeta;
use tokio::sync::mpsc;

/// 2023-11-14T22:13:20Z in epoch milliseconds.
pub const BASE_TIME_MS: i64 = 1_700_000_000_000;

/// One hour in milliseconds.
pub const HOUR_MS: i64 = 3_600_000;

/// Outbound queue size used by test sinks.
pub const TEST_SINK_CAPACITY: usize = 64;

/// Metadata for an event that started an hour before `BASE_TIME_MS` and
/// ends at `event_end_time`.
#[must_use]
pub fn meta_ending_at(event_end_time: i64) -> ConnectionMeta {
    ConnectionMeta {
        event_start_time: BASE_TIME_MS - HOUR_MS,
        event_end_time,
    }
}

/// Metadata for an event still running for an hour after `BASE_TIME_MS`.
#[must_use]
pub fn live_meta() -> ConnectionMeta {
    meta_ending_at(BASE_TIME_MS + HOUR_MS)
}

/// A connection sink and the receiver a socket writer would drain.
#[must_use]
pub fn sink() -> (ConnectionSink, mpsc::Receiver<OutboundFrame>) {
    mpsc::channel(TEST_SINK_CAPACITY)
}

/// Every frame currently queued on `rx`.
pub fn drain_frames(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Client `time_sync` frame as sent over the socket.
#[must_use]
pub fn time_sync_frame(event_id: EventId, event_end_time: i64) -> String {
    format!(
        r#"{{"type":"time_sync","eventId":{event_id},"currentTime":{BASE_TIME_MS},"timestamp":{BASE_TIME_MS},"eventStartTime":{start},"eventEndTime":{event_end_time}}}"#,
        start = BASE_TIME_MS - HOUR_MS,
    )
}
