//! End-to-end presence scenarios.
//!
//! Runs the presence actor with a real `DeliveryScheduler` over in-memory
//! collaborators. Tokio time is paused; the wall clock is a `ManualClock`
//! moved in lockstep with `tokio::time::advance`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use ps_service::actors::{PresenceActor, PresenceActorHandle, PresenceSettings};
use ps_service::delivery::{DeliveryScheduler, DeliverySettings, EndOfStreamHandler};
use ps_service::protocol::{
    OutboundFrame, ServerMessage, CLOSE_NORMAL, EVENT_ALREADY_ENDED_MESSAGE,
    EVENT_DEADLINE_MESSAGE, EVENT_ENDED_CLOSE_REASON,
};
use ps_service::registry::JoinOutcome;
use ps_service::ws::ConnectionSession;
use ps_test_utils::{
    drain_frames, live_meta, meta_ending_at, sink, time_sync_frame, ManualClock,
    MockEventDirectory, MockJobQueue, MockNotificationStore, RecordingHandler, BASE_TIME_MS,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WINDOW: Duration = Duration::from_secs(30);
const TICK: Duration = Duration::from_secs(5);
const GENERATION_SEED: u64 = 1_000;

struct Stack {
    presence: PresenceActorHandle,
    task: JoinHandle<()>,
    clock: ManualClock,
    queue: MockJobQueue,
    store: MockNotificationStore,
}

fn spawn_with_handler(clock: &ManualClock, handler: Arc<dyn EndOfStreamHandler>) -> (PresenceActorHandle, JoinHandle<()>) {
    PresenceActor::spawn(
        PresenceSettings {
            debounce_window: WINDOW,
            time_sync_interval: TICK,
            generation_seed: GENERATION_SEED,
        },
        CancellationToken::new(),
        Arc::new(clock.clone()),
        handler,
    )
}

fn spawn_stack() -> Stack {
    let clock = ManualClock::at(BASE_TIME_MS);
    let directory = MockEventDirectory::new()
        .with_event(42, "Launch stream", Some(7))
        .with_event(9, "Q&A", Some(7))
        .with_host(7, "host@example.com");
    let queue = MockJobQueue::new();
    let store = MockNotificationStore::new();

    let scheduler = DeliveryScheduler::new(
        Arc::new(directory),
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        DeliverySettings {
            delay: WINDOW,
            keep_completed: 10,
            keep_failed: 5,
            link_base: "/events".to_string(),
        },
    );

    let (presence, task) = spawn_with_handler(&clock, Arc::new(scheduler));
    Stack {
        presence,
        task,
        clock,
        queue,
        store,
    }
}

/// Move both clocks forward and let spawned tasks run.
async fn advance(clock: &ManualClock, by: Duration) {
    clock.advance(by);
    tokio::time::advance(by).await;
    settle().await;
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_last_viewer_leaving_schedules_one_notification() {
    let s = spawn_stack();
    let (a_sink, _a) = sink();
    let (b_sink, _b) = sink();

    s.presence.join("A".to_string(), 42, live_meta(), a_sink).await.unwrap();
    s.presence.join("B".to_string(), 42, live_meta(), b_sink).await.unwrap();

    // Room still has A: nothing armed
    s.presence.leave("B".to_string()).await.unwrap();
    assert_eq!(s.presence.room_size(42).await.unwrap(), 1);
    assert_eq!(s.presence.get_status().await.unwrap().armed_timers, 0);

    s.presence.leave("A".to_string()).await.unwrap();
    assert_eq!(s.presence.room_size(42).await.unwrap(), 0);
    assert_eq!(s.presence.get_status().await.unwrap().armed_timers, 1);

    advance(&s.clock, WINDOW - Duration::from_secs(1)).await;
    assert!(s.queue.jobs().is_empty());

    advance(&s.clock, Duration::from_secs(1)).await;
    let jobs = s.queue.jobs();
    assert_eq!(jobs.len(), 1);
    let queued = jobs.first().unwrap();
    assert_eq!(queued.job.event_id, 42);
    assert_eq!(queued.job.event_name, "Launch stream");
    assert_eq!(queued.job.host_email, "host@example.com");
    assert_eq!(queued.job.host_id, 7);
    assert_eq!(queued.options.delay, WINDOW);
    assert_eq!(queued.options.keep_completed, 10);
    assert_eq!(queued.options.keep_failed, 5);
    assert!(queued.options.job_id.starts_with("event_end_notification:42:"));

    let records = s.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records.first().unwrap().user_id, 7);
    assert_eq!(records.first().unwrap().link, "/events/42");

    // Never a second signal for the same cycle
    advance(&s.clock, WINDOW * 3).await;
    assert_eq!(s.queue.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_within_window_suppresses_notification() {
    let s = spawn_stack();
    let (a_sink, _a) = sink();
    let (b_sink, _b) = sink();
    let (c_sink, _c) = sink();

    s.presence.join("A".to_string(), 42, live_meta(), a_sink).await.unwrap();
    s.presence.join("B".to_string(), 42, live_meta(), b_sink).await.unwrap();
    s.presence.leave("A".to_string()).await.unwrap();
    s.presence.leave("B".to_string()).await.unwrap();

    advance(&s.clock, Duration::from_secs(10)).await;
    let outcome = s
        .presence
        .join("C".to_string(), 42, live_meta(), c_sink)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        JoinOutcome::Joined {
            room_size: 1,
            room_created: true
        }
    ));
    assert_eq!(s.presence.get_status().await.unwrap().armed_timers, 0);

    advance(&s.clock, WINDOW * 2).await;
    assert_eq!(s.queue.call_count(), 0);
    assert_eq!(s.store.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_join_to_ended_event_is_rejected_and_closed() {
    let s = spawn_stack();
    let (session_sink, mut rx) = sink();
    let mut session = ConnectionSession::new("late".to_string(), s.presence.clone(), session_sink);

    session
        .handle_text(&time_sync_frame(7, BASE_TIME_MS - 1_000))
        .await;

    assert_eq!(session.joined_event(), None);
    assert_eq!(
        drain_frames(&mut rx),
        vec![
            OutboundFrame::Message(ServerMessage::EventEnded {
                event_id: 7,
                message: Some(EVENT_ALREADY_ENDED_MESSAGE.to_string()),
            }),
            OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: EVENT_ENDED_CLOSE_REASON.to_string(),
            },
        ]
    );
    assert_eq!(s.presence.room_size(7).await.unwrap(), 0);
    assert_eq!(s.presence.total_connections().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_force_ends_room_within_two_ticks() {
    let s = spawn_stack();
    let mut receivers = Vec::new();
    for id in ["A", "B", "C"] {
        let (tx, rx) = sink();
        s.presence
            .join(id.to_string(), 9, meta_ending_at(BASE_TIME_MS + 2_000), tx)
            .await
            .unwrap();
        receivers.push(rx);
    }
    assert_eq!(s.presence.room_size(9).await.unwrap(), 3);

    advance(&s.clock, TICK).await;
    advance(&s.clock, TICK).await;

    for rx in &mut receivers {
        let frames = drain_frames(rx);
        let tail: Vec<_> = frames.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                OutboundFrame::Message(ServerMessage::EventEnded {
                    event_id: 9,
                    message: Some(EVENT_DEADLINE_MESSAGE.to_string()),
                }),
                OutboundFrame::Close {
                    code: CLOSE_NORMAL,
                    reason: EVENT_ENDED_CLOSE_REASON.to_string(),
                },
            ]
        );
    }

    let status = s.presence.get_status().await.unwrap();
    assert_eq!(status.rooms, 0);
    assert_eq!(status.connections, 0);

    // Sockets closing afterwards must not start an end-of-stream cycle
    for id in ["A", "B", "C"] {
        s.presence.leave(id.to_string()).await.unwrap();
    }
    assert_eq!(s.presence.get_status().await.unwrap().armed_timers, 0);
    advance(&s.clock, WINDOW * 2).await;
    assert_eq!(s.queue.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_short_deadline_joiner_does_not_end_room_for_others() {
    let s = spawn_stack();
    let mut viewers = Vec::new();
    for id in ["A", "B", "C"] {
        let (tx, rx) = sink();
        s.presence.join(id.to_string(), 42, live_meta(), tx).await.unwrap();
        viewers.push(rx);
    }
    let (short_tx, mut short_rx) = sink();
    s.presence
        .join("short".to_string(), 42, meta_ending_at(BASE_TIME_MS + 1), short_tx)
        .await
        .unwrap();

    advance(&s.clock, TICK).await;

    let short_frames = drain_frames(&mut short_rx);
    assert!(matches!(
        short_frames.last(),
        Some(OutboundFrame::Close {
            code: CLOSE_NORMAL,
            ..
        })
    ));

    assert_eq!(s.presence.room_size(42).await.unwrap(), 3);
    for rx in &mut viewers {
        let frames = drain_frames(rx);
        assert!(frames
            .iter()
            .all(|frame| matches!(frame, OutboundFrame::Message(ServerMessage::TimeSync { .. }))));
        assert!(!frames.is_empty());
    }

    // The expired socket closing is not a room transition
    s.presence.leave("short".to_string()).await.unwrap();
    let status = s.presence.get_status().await.unwrap();
    assert_eq!(status.rooms, 1);
    assert_eq!(status.armed_timers, 0);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_room_size_tracks_joined_minus_left() {
    let s = spawn_stack();
    let mut joined: Vec<String> = Vec::new();
    let mut receivers = Vec::new();

    // Deterministic interleaving of joins, leaves and unknown leaves
    for step in 0..40_usize {
        if step % 3 == 2 && !joined.is_empty() {
            let id = joined.remove(step % joined.len());
            s.presence.leave(id).await.unwrap();
        } else if step % 7 == 6 {
            s.presence.leave(format!("ghost-{step}")).await.unwrap();
        } else {
            let id = format!("conn-{step}");
            let (tx, rx) = sink();
            s.presence
                .join(id.clone(), 42, live_meta(), tx)
                .await
                .unwrap();
            receivers.push(rx);
            joined.push(id);
        }

        assert_eq!(s.presence.room_size(42).await.unwrap(), joined.len());
    }

    assert_eq!(s.presence.total_connections().await.unwrap(), joined.len());
}

#[tokio::test(start_paused = true)]
async fn test_each_cycle_gets_its_own_job_id() {
    let s = spawn_stack();

    for round in 0..2 {
        let (tx, _rx) = sink();
        let id = format!("viewer-{round}");
        s.presence.join(id.clone(), 42, live_meta(), tx).await.unwrap();
        s.presence.leave(id).await.unwrap();
        advance(&s.clock, WINDOW).await;
    }

    let ids: Vec<String> = s.queue.jobs().into_iter().map(|q| q.options.job_id).collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids.first(), ids.get(1));
    assert_eq!(s.store.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_signals_fire_per_event_independently() {
    let clock = ManualClock::at(BASE_TIME_MS);
    let handler = RecordingHandler::new();
    let (presence, _task) = spawn_with_handler(&clock, Arc::new(handler.clone()));

    let (a_sink, _a) = sink();
    let (b_sink, _b) = sink();
    presence.join("a".to_string(), 1, live_meta(), a_sink).await.unwrap();
    presence.join("b".to_string(), 2, live_meta(), b_sink).await.unwrap();

    presence.leave("a".to_string()).await.unwrap();
    advance(&clock, Duration::from_secs(20)).await;
    presence.leave("b".to_string()).await.unwrap();

    advance(&clock, Duration::from_secs(10)).await;
    assert_eq!(handler.signals_for(1).len(), 1);
    assert!(handler.signals_for(2).is_empty());

    advance(&clock, Duration::from_secs(20)).await;
    assert_eq!(handler.signals_for(2).len(), 1);
    assert_eq!(handler.signals().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_cycles() {
    let s = spawn_stack();
    let (a_sink, mut a) = sink();
    let (b_sink, _b) = sink();

    s.presence.join("a".to_string(), 42, live_meta(), a_sink).await.unwrap();
    s.presence.join("b".to_string(), 9, live_meta(), b_sink).await.unwrap();
    s.presence.leave("b".to_string()).await.unwrap();

    s.presence.cancel();
    s.task.await.unwrap();

    assert_eq!(
        drain_frames(&mut a).last(),
        Some(&OutboundFrame::Close {
            code: CLOSE_NORMAL,
            reason: "Server shutting down".to_string(),
        })
    );
    assert!(s.presence.room_size(42).await.is_err());

    advance(&s.clock, WINDOW * 2).await;
    assert_eq!(s.queue.call_count(), 0);
}
