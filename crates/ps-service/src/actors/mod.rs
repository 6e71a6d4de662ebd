//! Actor model for the presence service.
//!
//! ```text
//! WebSocket tasks (one per viewer)
//!        │  PresenceMessage (bounded mpsc)
//!        ▼
//! PresenceActor (singleton)
//! ├── ConnectionRegistry
//! ├── EndOfStreamDetector ──▶ timer tasks ──▶ TimerFired
//! └── TimeSyncBroadcaster (interval arm)
//!        │  EndOfStreamSignal
//!        ▼
//! EndOfStreamHandler (spawned task)
//! ```

pub mod messages;
pub mod metrics;
pub mod presence;

pub use messages::{PresenceMessage, PresenceStatus};
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use presence::{PresenceActor, PresenceActorHandle, PresenceSettings};
