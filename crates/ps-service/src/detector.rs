//! End-of-stream detector: a debounced, cancellable timer per event.
//!
//! Per-event state machine:
//!
//! ```text
//!            room emptied                 timer fires (generation matches)
//! UNARMED ─────────────────▶ ARMED(fire_at) ─────────────────────────────▶ signal, UNARMED
//!    ▲                          │
//!    └──────── join ────────────┘
//! ```
//!
//! The detector never runs callbacks itself. Each armed timer is a small task
//! that sleeps until `fire_at` and posts a [`TimerFired`] back to the owner's
//! mailbox; the owner then calls [`EndOfStreamDetector::fire`], which accepts
//! the firing only if the table still holds the same generation. A join that
//! the owner processes first removes the entry, so a late firing is ignored
//! and can never double-fire.
//!
//! Generations are unique per arm (monotonic across all events) and double as
//! the idempotency key of the notification job.

use crate::clock::Clock;
use crate::protocol::EventId;

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Posted by a timer task when its deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub event_id: EventId,
    pub generation: u64,
}

/// Handle returned by [`EndOfStreamDetector::arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    pub event_id: EventId,
    pub generation: u64,
    pub fire_at: Instant,
}

/// Accepted firing: the event is treated as ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfStreamSignal {
    pub event_id: EventId,
    /// Cycle generation of the timer that fired.
    pub generation: u64,
}

/// First generation for a new process: the wall clock in microseconds.
///
/// A restarted process starts above every generation its predecessor could
/// have handed out unless that one armed more than one timer per microsecond.
#[must_use]
pub fn generation_seed(clock: &dyn Clock) -> u64 {
    u64::try_from(clock.now_micros()).unwrap_or_default()
}

/// A live timer-table entry.
#[derive(Debug)]
struct PendingEndTimer {
    generation: u64,
    fire_at: Instant,
    cancel: CancellationToken,
}

/// Timer table keyed by event id.
#[derive(Debug)]
pub struct EndOfStreamDetector {
    window: Duration,
    timers: HashMap<EventId, PendingEndTimer>,
    next_generation: u64,
    /// Parent of every timer task's token.
    parent_token: CancellationToken,
    notify: mpsc::UnboundedSender<TimerFired>,
}

impl EndOfStreamDetector {
    /// Create a detector.
    ///
    /// * `window` - Debounce window, identical for every event
    /// * `generation_seed` - First generation handed out, normally from
    ///   [`generation_seed`]
    /// * `parent_token` - Cancelling it stops every pending timer task
    /// * `notify` - Where timer tasks post [`TimerFired`]
    #[must_use]
    pub fn new(
        window: Duration,
        generation_seed: u64,
        parent_token: CancellationToken,
        notify: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        Self {
            window,
            timers: HashMap::new(),
            next_generation: generation_seed,
            parent_token,
            notify,
        }
    }

    /// Configured debounce window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arm (or re-arm) the timer for `event_id` at now + window.
    ///
    /// Re-arming an already armed event cancels the previous timer first, so
    /// at most one timer per event is ever live.
    pub fn arm(&mut self, event_id: EventId) -> ArmedTimer {
        self.cancel(event_id);

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let fire_at = Instant::now() + self.window;
        let cancel = self.parent_token.child_token();

        let task_token = cancel.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep_until(fire_at) => {
                    // Owner gone means shutdown; nothing left to notify
                    let _ = notify.send(TimerFired { event_id, generation });
                }
            }
        });

        self.timers.insert(
            event_id,
            PendingEndTimer {
                generation,
                fire_at,
                cancel,
            },
        );

        debug!(
            target: "ps.detector",
            event_id = event_id,
            generation = generation,
            window_secs = self.window.as_secs(),
            "End-of-stream timer armed"
        );

        ArmedTimer {
            event_id,
            generation,
            fire_at,
        }
    }

    /// Cancel the timer for `event_id`. Returns `false` if nothing was armed.
    ///
    /// Idempotent: cancelling twice, or after the timer fired, is a no-op.
    pub fn cancel(&mut self, event_id: EventId) -> bool {
        match self.timers.remove(&event_id) {
            Some(timer) => {
                timer.cancel.cancel();
                debug!(
                    target: "ps.detector",
                    event_id = event_id,
                    generation = timer.generation,
                    "End-of-stream timer cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel only if `handle` is still the live timer for its event.
    pub fn cancel_handle(&mut self, handle: &ArmedTimer) -> bool {
        match self.timers.get(&handle.event_id) {
            Some(timer) if timer.generation == handle.generation => self.cancel(handle.event_id),
            _ => false,
        }
    }

    /// Accept a firing posted by a timer task.
    ///
    /// Returns the signal exactly once per armed timer; stale firings
    /// (cancelled, replaced or already accepted) return `None`.
    pub fn fire(&mut self, fired: TimerFired) -> Option<EndOfStreamSignal> {
        match self.timers.get(&fired.event_id) {
            Some(timer) if timer.generation == fired.generation => {
                self.timers.remove(&fired.event_id);
                Some(EndOfStreamSignal {
                    event_id: fired.event_id,
                    generation: fired.generation,
                })
            }
            _ => {
                debug!(
                    target: "ps.detector",
                    event_id = fired.event_id,
                    generation = fired.generation,
                    "Ignoring stale end-of-stream timer"
                );
                None
            }
        }
    }

    /// Cancel every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.cancel.cancel();
        }
        count
    }

    #[must_use]
    pub fn is_armed(&self, event_id: EventId) -> bool {
        self.timers.contains_key(&event_id)
    }

    /// Deadline of the armed timer for `event_id`.
    #[must_use]
    pub fn fire_at(&self, event_id: EventId) -> Option<Instant> {
        self.timers.get(&event_id).map(|timer| timer.fire_at)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}
