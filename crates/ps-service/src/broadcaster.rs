//! Time-sync broadcaster.
//!
//! Runs once per tick on the presence actor. Each tick:
//!
//! 1. Connections whose own deadline (`eventEndTime`) has passed are removed
//!    from the registry and receive `event_ended` plus a normal close. A room
//!    left empty this way is force-ended.
//! 2. Every remaining room receives a `time_sync` frame carrying the current
//!    server time.
//!
//! Expired connections are removed directly, so a force-ended room never goes
//! through the room-emptied path and never arms the end-of-stream detector.

use crate::clock::epoch_secs;
use crate::protocol::{
    try_deliver, EventId, OutboundFrame, ServerMessage, EVENT_DEADLINE_MESSAGE,
};
use crate::registry::ConnectionRegistry;

use std::time::Duration;
use tracing::{debug, info};

/// Summary of one broadcaster tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Rooms that received a `time_sync` frame.
    pub rooms_synced: usize,
    /// Rooms removed because every member's deadline passed.
    pub force_ended: Vec<EventId>,
    /// Connections closed because their deadline passed.
    pub connections_closed: usize,
    /// Frames that could not be queued (full or closed outbound queue).
    pub frames_dropped: usize,
}

/// Periodic heartbeat and deadline enforcement.
#[derive(Debug, Clone, Copy)]
pub struct TimeSyncBroadcaster {
    period: Duration,
}

impl TimeSyncBroadcaster {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one tick against `registry` at wall-clock `now_ms`.
    pub fn tick(&self, registry: &mut ConnectionRegistry, now_ms: i64) -> TickReport {
        let mut report = TickReport::default();

        for expired in registry.remove_expired(now_ms) {
            let event_id = expired.event_id;
            for (connection_id, sink) in &expired.members {
                for frame in OutboundFrame::event_ended(event_id, EVENT_DEADLINE_MESSAGE) {
                    if !try_deliver(sink, frame) {
                        report.frames_dropped += 1;
                        debug!(
                            target: "ps.broadcaster",
                            event_id = event_id,
                            connection_id = %connection_id,
                            "Dropped event_ended frame"
                        );
                    }
                }
            }
            report.connections_closed += expired.members.len();

            if expired.room_removed {
                info!(
                    target: "ps.broadcaster",
                    event_id = event_id,
                    connections_closed = expired.members.len(),
                    "Event deadline passed, room force-ended"
                );
                report.force_ended.push(event_id);
            } else {
                debug!(
                    target: "ps.broadcaster",
                    event_id = event_id,
                    connections_closed = expired.members.len(),
                    room_size = registry.room_size(event_id),
                    "Connection deadlines passed, room stays open"
                );
            }
        }

        let current_time = epoch_secs(now_ms);
        let event_ids: Vec<EventId> = registry.event_ids().collect();
        for event_id in event_ids {
            let frame = OutboundFrame::Message(ServerMessage::TimeSync {
                event_id,
                current_time,
                timestamp: now_ms,
            });
            for sink in registry.room_sinks(event_id) {
                if !try_deliver(sink, frame.clone()) {
                    report.frames_dropped += 1;
                }
            }
            report.rooms_synced += 1;
        }

        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{ConnectionSink, CLOSE_NORMAL};
    use crate::registry::ConnectionMeta;
    use tokio::sync::mpsc;

    const NOW: i64 = 1_700_000_000_500;

    fn join(
        registry: &mut ConnectionRegistry,
        id: &str,
        event_id: EventId,
        event_end_time: i64,
    ) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(8);
        let meta = ConnectionMeta {
            event_start_time: NOW - 60_000,
            event_end_time,
        };
        registry.join(id.to_string(), event_id, meta, tx, NOW);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_tick_sends_time_sync_to_every_room() {
        let broadcaster = TimeSyncBroadcaster::new(Duration::from_secs(5));
        let mut registry = ConnectionRegistry::new();
        let mut a = join(&mut registry, "a", 1, NOW + 60_000);
        let mut b = join(&mut registry, "b", 2, NOW + 60_000);

        let report = broadcaster.tick(&mut registry, NOW);

        assert_eq!(report.rooms_synced, 2);
        assert!(report.force_ended.is_empty());
        assert_eq!(
            drain(&mut a),
            vec![OutboundFrame::Message(ServerMessage::TimeSync {
                event_id: 1,
                current_time: 1_700_000_000,
                timestamp: NOW,
            })]
        );
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn test_tick_force_ends_expired_room() {
        let broadcaster = TimeSyncBroadcaster::new(Duration::from_secs(5));
        let mut registry = ConnectionRegistry::new();
        let mut a = join(&mut registry, "a", 9, NOW + 1_000);
        let mut b = join(&mut registry, "b", 9, NOW + 1_000);
        let mut c = join(&mut registry, "c", 9, NOW + 1_000);
        let mut other = join(&mut registry, "d", 3, NOW + 60_000);

        let report = broadcaster.tick(&mut registry, NOW + 1_000);

        assert_eq!(report.force_ended, vec![9]);
        assert_eq!(report.connections_closed, 3);
        assert_eq!(report.rooms_synced, 1);
        assert!(!registry.has_room(9));
        assert_eq!(registry.total_connections(), 1);

        for rx in [&mut a, &mut b, &mut c] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 2);
            assert!(matches!(
                frames.first(),
                Some(OutboundFrame::Message(ServerMessage::EventEnded { event_id: 9, .. }))
            ));
            assert!(matches!(
                frames.get(1),
                Some(OutboundFrame::Close {
                    code: CLOSE_NORMAL,
                    ..
                })
            ));
        }

        // Unaffected room still gets its heartbeat
        assert!(matches!(
            drain(&mut other).as_slice(),
            [OutboundFrame::Message(ServerMessage::TimeSync { event_id: 3, .. })]
        ));
    }

    #[test]
    fn test_early_deadline_closes_only_that_connection() {
        let broadcaster = TimeSyncBroadcaster::new(Duration::from_secs(5));
        let mut registry = ConnectionRegistry::new();
        let mut viewers: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| join(&mut registry, id, 42, NOW + 3_600_000))
            .collect();
        let mut short = join(&mut registry, "short", 42, NOW + 1);

        let report = broadcaster.tick(&mut registry, NOW + 5_000);

        assert!(report.force_ended.is_empty());
        assert_eq!(report.connections_closed, 1);
        assert_eq!(report.rooms_synced, 1);
        assert_eq!(registry.room_size(42), 3);

        assert!(matches!(
            drain(&mut short).as_slice(),
            [
                OutboundFrame::Message(ServerMessage::EventEnded { event_id: 42, .. }),
                OutboundFrame::Close {
                    code: CLOSE_NORMAL,
                    ..
                }
            ]
        ));
        for rx in &mut viewers {
            assert!(matches!(
                drain(rx).as_slice(),
                [OutboundFrame::Message(ServerMessage::TimeSync { event_id: 42, .. })]
            ));
        }
    }

    #[test]
    fn test_full_queue_counts_dropped_frames() {
        let broadcaster = TimeSyncBroadcaster::new(Duration::from_secs(5));
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx): (ConnectionSink, _) = mpsc::channel(1);
        let meta = ConnectionMeta {
            event_start_time: NOW,
            event_end_time: NOW + 60_000,
        };
        registry.join("a".to_string(), 1, meta, tx, NOW);

        assert_eq!(broadcaster.tick(&mut registry, NOW).frames_dropped, 0);
        assert_eq!(broadcaster.tick(&mut registry, NOW).frames_dropped, 1);
    }

    #[test]
    fn test_tick_on_empty_registry_is_noop() {
        let broadcaster = TimeSyncBroadcaster::new(Duration::from_secs(5));
        let mut registry = ConnectionRegistry::new();

        assert_eq!(broadcaster.tick(&mut registry, NOW), TickReport::default());
    }
}
