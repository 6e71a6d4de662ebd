//! Presence Service (PS) Library
//!
//! Real-time presence core for live-streamed events:
//!
//! - Tracks which viewer connections are attached to which event room
//! - Pushes a periodic authoritative clock to every room
//! - Force-ends rooms whose scheduled end time has passed
//! - Detects that a stream has ended once its room stays empty for a
//!   debounce window
//! - Schedules a delayed host email job and writes an in-app notification
//!   for each detected end
//!
//! # Architecture
//!
//! ```text
//! ws gateway (per socket: reader loop + writer task)
//!     │ join / leave
//!     ▼
//! PresenceActor (singleton)
//! ├── ConnectionRegistry      rooms and connections
//! ├── TimeSyncBroadcaster     periodic tick
//! └── EndOfStreamDetector     debounce timers
//!     │ EndOfStreamSignal (spawned task)
//!     ▼
//! DeliveryScheduler
//! ├── JobQueue          (Redis)
//! └── NotificationStore (Postgres)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Presence actor and its handle
//! - [`registry`] - Room and connection bookkeeping
//! - [`broadcaster`] - Time-sync tick and deadline enforcement
//! - [`detector`] - Debounced end-of-stream timers
//! - [`delivery`] - Notification scheduling
//! - [`ws`] - WebSocket gateway and stats endpoints

pub mod actors;
pub mod broadcaster;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod detector;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod redis;
pub mod registry;
pub mod repositories;
pub mod ws;
