//! Wall-clock source used for event deadline checks.
//!
//! Deadlines (`eventEndTime`) are client-declared epoch milliseconds, so they
//! are compared against wall-clock time, never against `tokio::time::Instant`.
//! Debounce timers use tokio time and are unaffected by this trait.

/// Whole seconds of an epoch-millisecond timestamp, rounded toward negative
/// infinity.
#[must_use]
pub const fn epoch_secs(epoch_ms: i64) -> i64 {
    epoch_ms.div_euclid(1000)
}

/// Source of the current wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// Current time in whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64 {
        epoch_secs(self.now_ms())
    }

    /// Current time in microseconds since the Unix epoch.
    fn now_micros(&self) -> i64 {
        self.now_ms().saturating_mul(1000)
    }
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn now_micros(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}
