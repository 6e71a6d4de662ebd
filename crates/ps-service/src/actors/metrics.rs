//! Mailbox monitoring for the presence actor.
//!
//! | Level | Depth |
//! |-------|-------|
//! | Normal | < 100 |
//! | Warning | 100-500 |
//! | Critical | > 500 |
//!
//! The handle records an enqueue after each successful send; the actor records
//! a dequeue as it takes each message off the channel.

use crate::observability::metrics::set_actor_mailbox_depth;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const PRESENCE_MAILBOX_NORMAL: usize = 100;
pub const PRESENCE_MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

impl MailboxLevel {
    #[must_use]
    pub const fn for_depth(depth: usize) -> Self {
        if depth > PRESENCE_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth >= PRESENCE_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Queue depth tracking shared by the actor handle and the actor.
#[derive(Debug, Default)]
pub struct MailboxMonitor {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message accepted by the channel.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match MailboxLevel::for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "ps.actor.mailbox",
                    depth = new_depth,
                    threshold = PRESENCE_MAILBOX_WARNING,
                    "Presence mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == PRESENCE_MAILBOX_NORMAL => {
                // Logged once on crossing
                debug!(
                    target: "ps.actor.mailbox",
                    depth = new_depth,
                    "Presence mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message taken off the channel.
    pub fn record_dequeue(&self) {
        // Dequeue can race ahead of the sender's enqueue record
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        set_actor_mailbox_depth(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        MailboxLevel::for_depth(self.current_depth())
    }
}
