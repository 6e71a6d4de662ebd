//! # PS Test Utilities
//!
//! Shared test utilities for the Presence Service (PS).
//!
//! This crate provides in-memory collaborators and fixtures so presence and
//! delivery behavior can be tested without Redis or Postgres.
//!
//! ## Modules
//!
//! - `clock` - Manually driven wall clock
//! - `mock_directory` - In-memory event/host directory
//! - `mock_queue` - In-memory delayed job queue with id de-duplication
//! - `mock_store` - In-memory notification store
//! - `recording_handler` - End-of-stream handler that records signals
//! - `fixtures` - Connection metadata, sinks and time_sync frames
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ps_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let clock = ManualClock::at(BASE_TIME_MS);
//!     let handler = RecordingHandler::new();
//!
//!     let directory = MockEventDirectory::new()
//!         .with_event(42, "Launch stream", Some(7))
//!         .with_host(7, "host@example.com");
//!     let queue = MockJobQueue::new();
//!
//!     // Spawn the actor / scheduler with these and run your test...
//! }
//! ```

pub mod clock;
pub mod fixtures;
pub mod mock_directory;
pub mod mock_queue;
pub mod mock_store;
pub mod recording_handler;

// Re-export commonly used items
pub use clock::*;
pub use fixtures::*;
pub use mock_directory::*;
pub use mock_queue::*;
pub use mock_store::*;
pub use recording_handler::*;
