//! `PresenceActor` - single owner of all presence state.
//!
//! The actor owns the [`ConnectionRegistry`], the [`EndOfStreamDetector`]
//! timer table and the [`TimeSyncBroadcaster`] tick. Every mutation goes
//! through its mailbox, so per event the order of join, leave and timer
//! firing is the order in which the actor observes them.
//!
//! Nothing on this loop awaits an external system:
//! - timer waits are spawned tasks that post [`TimerFired`] back
//! - accepted end-of-stream signals are handed to the
//!   [`EndOfStreamHandler`] on a spawned task
//! - outbound frames are queued with `try_send`
//!
//! # Shutdown
//!
//! On cancellation the actor cancels every pending timer, stops ticking and
//! closes every registered connection with a normal close frame.

use crate::actors::messages::{PresenceMessage, PresenceStatus};
use crate::actors::metrics::MailboxMonitor;
use crate::broadcaster::TimeSyncBroadcaster;
use crate::clock::Clock;
use crate::delivery::EndOfStreamHandler;
use crate::detector::{EndOfStreamDetector, TimerFired};
use crate::errors::PsError;
use crate::observability::metrics::{
    record_end_of_stream_fired, record_join_rejected, record_outbound_dropped,
    record_room_force_ended, set_connections_active, set_end_timers_armed, set_rooms_active,
};
use crate::protocol::{try_deliver, ConnectionId, ConnectionSink, EventId, OutboundFrame, CLOSE_NORMAL};
use crate::registry::{ConnectionMeta, ConnectionRegistry, JoinOutcome, LeaveOutcome};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Presence actor mailbox capacity.
const PRESENCE_CHANNEL_BUFFER: usize = 4096;

/// Timing settings for the presence actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// Quiet period after a room empties before end-of-stream is signalled.
    pub debounce_window: Duration,
    /// Time-sync broadcast period.
    pub time_sync_interval: Duration,
    /// First end-of-stream generation.
    pub generation_seed: u64,
}

/// Handle to the `PresenceActor`.
#[derive(Clone, Debug)]
pub struct PresenceActorHandle {
    sender: mpsc::Sender<PresenceMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl PresenceActorHandle {
    /// Register a connection in the room for `event_id`.
    ///
    /// A rejected join leaves no trace in the registry; the caller is
    /// responsible for sending the terminal frames and closing.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        event_id: EventId,
        meta: ConnectionMeta,
        sink: ConnectionSink,
    ) -> Result<JoinOutcome, PsError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::Join {
            connection_id,
            event_id,
            meta,
            sink,
            respond_to: tx,
        })
        .await?;

        rx.await.map_err(|_| PsError::ShuttingDown)
    }

    /// Report a closed connection. Unknown ids are ignored by the actor.
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<(), PsError> {
        self.send(PresenceMessage::Leave { connection_id }).await
    }

    /// Number of connections in the room for `event_id`.
    pub async fn room_size(&self, event_id: EventId) -> Result<usize, PsError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::RoomSize {
            event_id,
            respond_to: tx,
        })
        .await?;

        rx.await.map_err(|_| PsError::ShuttingDown)
    }

    /// Number of registered connections across all rooms.
    pub async fn total_connections(&self) -> Result<usize, PsError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::TotalConnections { respond_to: tx })
            .await?;

        rx.await.map_err(|_| PsError::ShuttingDown)
    }

    pub async fn get_status(&self) -> Result<PresenceStatus, PsError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await.map_err(|_| PsError::ShuttingDown)
    }

    /// Cancel the actor (shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for tasks that must stop with the actor.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, message: PresenceMessage) -> Result<(), PsError> {
        if self.cancel_token.is_cancelled() {
            return Err(PsError::ShuttingDown);
        }
        self.sender
            .send(message)
            .await
            .map_err(|_| PsError::ShuttingDown)?;
        self.mailbox.record_enqueue();
        Ok(())
    }
}

/// The presence actor.
pub struct PresenceActor {
    receiver: mpsc::Receiver<PresenceMessage>,
    cancel_token: CancellationToken,
    registry: ConnectionRegistry,
    detector: EndOfStreamDetector,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    broadcaster: TimeSyncBroadcaster,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn EndOfStreamHandler>,
    mailbox: Arc<MailboxMonitor>,
}

impl PresenceActor {
    /// Spawn the actor and return a handle plus the task's join handle.
    ///
    /// # Arguments
    ///
    /// * `settings` - Debounce window, tick period and generation seed
    /// * `cancel_token` - Cancelling it shuts the actor down
    /// * `clock` - Wall clock used for event deadline checks
    /// * `handler` - Receives accepted end-of-stream signals
    pub fn spawn(
        settings: PresenceSettings,
        cancel_token: CancellationToken,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn EndOfStreamHandler>,
    ) -> (PresenceActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PRESENCE_CHANNEL_BUFFER);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let mailbox = Arc::new(MailboxMonitor::new());

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            registry: ConnectionRegistry::new(),
            detector: EndOfStreamDetector::new(
                settings.debounce_window,
                settings.generation_seed,
                cancel_token.child_token(),
                timer_tx,
            ),
            timer_rx,
            broadcaster: TimeSyncBroadcaster::new(settings.time_sync_interval),
            clock,
            handler,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PresenceActorHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "ps.actor.presence")]
    async fn run(mut self) {
        info!(
            target: "ps.actor.presence",
            debounce_window_secs = self.detector.window().as_secs(),
            time_sync_interval_secs = self.broadcaster.period().as_secs(),
            "PresenceActor started"
        );

        let period = self.broadcaster.period();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "ps.actor.presence",
                        "PresenceActor received cancellation signal"
                    );
                    self.shutdown();
                    break;
                }

                _ = ticker.tick() => {
                    self.handle_tick();
                }

                Some(fired) = self.timer_rx.recv() => {
                    self.handle_timer_fired(fired);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message);
                        }
                        None => {
                            info!(
                                target: "ps.actor.presence",
                                "PresenceActor channel closed, exiting"
                            );
                            self.shutdown();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "ps.actor.presence",
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "PresenceActor stopped"
        );
    }

    fn handle_message(&mut self, message: PresenceMessage) {
        match message {
            PresenceMessage::Join {
                connection_id,
                event_id,
                meta,
                sink,
                respond_to,
            } => {
                let outcome = self.handle_join(connection_id, event_id, meta, sink);
                let _ = respond_to.send(outcome);
            }

            PresenceMessage::Leave { connection_id } => {
                self.handle_leave(&connection_id);
            }

            PresenceMessage::RoomSize {
                event_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.room_size(event_id));
            }

            PresenceMessage::TotalConnections { respond_to } => {
                let _ = respond_to.send(self.registry.total_connections());
            }

            PresenceMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(PresenceStatus {
                    rooms: self.registry.room_count(),
                    connections: self.registry.total_connections(),
                    armed_timers: self.detector.armed_count(),
                    mailbox_depth: self.mailbox.current_depth(),
                });
            }
        }
    }

    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        event_id: EventId,
        meta: ConnectionMeta,
        sink: ConnectionSink,
    ) -> JoinOutcome {
        let now_ms = self.clock.now_ms();
        let outcome = self
            .registry
            .join(connection_id.clone(), event_id, meta, sink, now_ms);

        match outcome {
            JoinOutcome::Joined {
                room_size,
                room_created,
            } => {
                if self.detector.cancel(event_id) {
                    info!(
                        target: "ps.actor.presence",
                        event_id = event_id,
                        connection_id = %connection_id,
                        "Viewer returned within debounce window, end-of-stream cancelled"
                    );
                }
                debug!(
                    target: "ps.actor.presence",
                    event_id = event_id,
                    connection_id = %connection_id,
                    room_size = room_size,
                    room_created = room_created,
                    "Connection joined"
                );
                self.publish_gauges();
            }
            JoinOutcome::Rejected(reason) => {
                info!(
                    target: "ps.actor.presence",
                    event_id = event_id,
                    connection_id = %connection_id,
                    event_end_time = meta.event_end_time,
                    now_ms = now_ms,
                    reason = reason.as_str(),
                    "Join rejected"
                );
                record_join_rejected(reason.as_str());
            }
        }

        outcome
    }

    fn handle_leave(&mut self, connection_id: &str) {
        match self.registry.leave(connection_id) {
            LeaveOutcome::NotRegistered => {
                debug!(
                    target: "ps.actor.presence",
                    connection_id = %connection_id,
                    "Leave for unregistered connection ignored"
                );
            }
            LeaveOutcome::Left {
                event_id,
                room_size,
            } => {
                debug!(
                    target: "ps.actor.presence",
                    event_id = event_id,
                    connection_id = %connection_id,
                    room_size = room_size,
                    "Connection left"
                );
            }
            LeaveOutcome::RoomEmptied { event_id } => {
                let armed = self.detector.arm(event_id);
                info!(
                    target: "ps.actor.presence",
                    event_id = event_id,
                    connection_id = %connection_id,
                    generation = armed.generation,
                    "Last viewer left, end-of-stream timer armed"
                );
            }
        }
        self.publish_gauges();
    }

    fn handle_timer_fired(&mut self, fired: TimerFired) {
        let Some(signal) = self.detector.fire(fired) else {
            return;
        };

        info!(
            target: "ps.actor.presence",
            event_id = signal.event_id,
            generation = signal.generation,
            "No viewers returned within debounce window, event ended"
        );
        record_end_of_stream_fired();
        self.publish_gauges();

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler.on_end_of_stream(signal).await;
        });
    }

    fn handle_tick(&mut self) {
        let report = self
            .broadcaster
            .tick(&mut self.registry, self.clock.now_ms());

        for _ in &report.force_ended {
            record_room_force_ended();
        }
        if report.frames_dropped > 0 {
            debug!(
                target: "ps.actor.presence",
                frames_dropped = report.frames_dropped,
                "Outbound frames dropped during tick"
            );
            record_outbound_dropped(report.frames_dropped);
        }
        if report.connections_closed > 0 {
            self.publish_gauges();
        }
    }

    fn shutdown(&mut self) {
        let timers_cancelled = self.detector.cancel_all();
        let connections = self.registry.drain();
        let reason = PsError::ShuttingDown.close_reason();

        let mut dropped = 0;
        for (_, sink) in &connections {
            let frame = OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: reason.to_string(),
            };
            if !try_deliver(sink, frame) {
                dropped += 1;
            }
        }

        info!(
            target: "ps.actor.presence",
            timers_cancelled = timers_cancelled,
            connections_closed = connections.len(),
            close_frames_dropped = dropped,
            "PresenceActor shut down"
        );
        self.publish_gauges();
    }

    fn publish_gauges(&self) {
        set_connections_active(self.registry.total_connections());
        set_rooms_active(self.registry.room_count());
        set_end_timers_armed(self.detector.armed_count());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::detector::EndOfStreamSignal;
    use crate::protocol::ServerMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    const START_MS: i64 = 1_700_000_000_000;
    const WINDOW: Duration = Duration::from_secs(30);
    const TICK: Duration = Duration::from_secs(5);

    /// Wall clock pinned by the test.
    struct TestClock(AtomicI64);

    impl Clock for TestClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        signals: Mutex<Vec<EndOfStreamSignal>>,
    }

    impl RecordingHandler {
        fn signals(&self) -> Vec<EndOfStreamSignal> {
            self.signals.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EndOfStreamHandler for RecordingHandler {
        async fn on_end_of_stream(&self, signal: EndOfStreamSignal) {
            self.signals.lock().unwrap().push(signal);
        }
    }

    struct Harness {
        handle: PresenceActorHandle,
        task: JoinHandle<()>,
        clock: Arc<TestClock>,
        handler: Arc<RecordingHandler>,
    }

    fn spawn_actor() -> Harness {
        let clock = Arc::new(TestClock(AtomicI64::new(START_MS)));
        let handler = Arc::new(RecordingHandler::default());
        let (handle, task) = PresenceActor::spawn(
            PresenceSettings {
                debounce_window: WINDOW,
                time_sync_interval: TICK,
                generation_seed: 1,
            },
            CancellationToken::new(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&handler) as Arc<dyn EndOfStreamHandler>,
        );
        Harness {
            handle,
            task,
            clock,
            handler,
        }
    }

    fn meta(event_end_time: i64) -> ConnectionMeta {
        ConnectionMeta {
            event_start_time: START_MS - 60_000,
            event_end_time,
        }
    }

    async fn join(
        handle: &PresenceActorHandle,
        id: &str,
        event_id: EventId,
    ) -> (JoinOutcome, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(32);
        let outcome = handle
            .join(id.to_string(), event_id, meta(START_MS + 3_600_000), tx)
            .await
            .unwrap();
        (outcome, rx)
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_and_leave_update_room_size() {
        let h = spawn_actor();

        let (outcome, _a) = join(&h.handle, "a", 42).await;
        assert!(matches!(outcome, JoinOutcome::Joined { room_size: 1, .. }));
        let (_, _b) = join(&h.handle, "b", 42).await;

        assert_eq!(h.handle.room_size(42).await.unwrap(), 2);
        assert_eq!(h.handle.total_connections().await.unwrap(), 2);

        h.handle.leave("a".to_string()).await.unwrap();
        assert_eq!(h.handle.room_size(42).await.unwrap(), 1);

        let status = h.handle.get_status().await.unwrap();
        assert_eq!(status.rooms, 1);
        assert_eq!(status.connections, 1);
        assert_eq!(status.armed_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_signals_once_after_window() {
        let h = spawn_actor();

        let (_, _a) = join(&h.handle, "a", 42).await;
        h.handle.leave("a".to_string()).await.unwrap();
        assert_eq!(h.handle.get_status().await.unwrap().armed_timers, 1);

        advance(WINDOW - Duration::from_secs(1)).await;
        assert!(h.handler.signals().is_empty());

        advance(Duration::from_secs(1)).await;
        let signals = h.handler.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals.first().map(|s| s.event_id), Some(42));

        advance(WINDOW * 4).await;
        assert_eq!(h.handler.signals().len(), 1, "must never double-fire");
        assert_eq!(h.handle.get_status().await.unwrap().armed_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_window_cancels_signal() {
        let h = spawn_actor();

        let (_, _a) = join(&h.handle, "a", 42).await;
        h.handle.leave("a".to_string()).await.unwrap();

        advance(Duration::from_secs(10)).await;
        let (_, _b) = join(&h.handle, "b", 42).await;
        assert_eq!(h.handle.get_status().await.unwrap().armed_timers, 0);

        advance(WINDOW * 2).await;
        assert!(h.handler.signals().is_empty());
        assert_eq!(h.handle.room_size(42).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_cycle_gets_new_generation() {
        let h = spawn_actor();

        let (_, _a) = join(&h.handle, "a", 7).await;
        h.handle.leave("a".to_string()).await.unwrap();
        advance(WINDOW).await;

        let (_, _b) = join(&h.handle, "b", 7).await;
        h.handle.leave("b".to_string()).await.unwrap();
        advance(WINDOW).await;

        let signals = h.handler.signals();
        assert_eq!(signals.len(), 2);
        let generations: Vec<u64> = signals.iter().map(|s| s.generation).collect();
        assert_ne!(generations.first(), generations.get(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_join_rejected_without_touching_room() {
        let h = spawn_actor();
        let (tx, _rx) = mpsc::channel(8);

        let outcome = h
            .handle
            .join("late".to_string(), 9, meta(START_MS - 1), tx)
            .await
            .unwrap();

        assert!(matches!(outcome, JoinOutcome::Rejected(_)));
        assert_eq!(h.handle.room_size(9).await.unwrap(), 0);
        assert_eq!(h.handle.get_status().await.unwrap().armed_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sends_time_sync_and_force_ends_expired_room() {
        let h = spawn_actor();
        let (tx, mut rx) = mpsc::channel(32);
        h.handle
            .join("a".to_string(), 3, meta(START_MS + 7_000), tx)
            .await
            .unwrap();

        // First tick: before the deadline
        advance(TICK).await;
        let frame = rx.try_recv().expect("time_sync on first tick");
        assert!(matches!(
            frame,
            OutboundFrame::Message(ServerMessage::TimeSync { event_id: 3, .. })
        ));

        // Second tick: wall clock has passed eventEndTime
        h.clock.0.store(START_MS + 10_000, Ordering::SeqCst);
        advance(TICK).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(OutboundFrame::Message(ServerMessage::EventEnded { event_id: 3, .. }))
        ));
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Close { .. })));

        assert_eq!(h.handle.room_size(3).await.unwrap(), 0);

        // Force-ended rooms never arm the detector
        h.handle.leave("a".to_string()).await.unwrap();
        assert_eq!(h.handle.get_status().await.unwrap().armed_timers, 0);
        advance(WINDOW * 2).await;
        assert!(h.handler.signals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_connections_and_cancels_timers() {
        let h = spawn_actor();

        let (_, mut a) = join(&h.handle, "a", 1).await;
        let (_, _b) = join(&h.handle, "b", 2).await;
        h.handle.leave("b".to_string()).await.unwrap();
        assert_eq!(h.handle.get_status().await.unwrap().armed_timers, 1);

        h.handle.cancel();
        h.task.await.unwrap();

        assert!(matches!(
            a.try_recv(),
            Ok(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                ..
            })
        ));

        advance(WINDOW * 2).await;
        assert!(h.handler.signals().is_empty());
        assert!(matches!(
            h.handle.room_size(1).await,
            Err(PsError::ShuttingDown)
        ));
    }
}
