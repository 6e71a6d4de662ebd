//! In-memory event and host directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use ps_test_utils::MockEventDirectory;
//!
//! let directory = MockEventDirectory::new()
//!     .with_event(42, "Launch stream", Some(7))
//!     .with_host(7, "host@example.com");
//!
//! // Lookups fail with a database error
//! let broken = MockEventDirectory::failing();
//! ```

use async_trait::async_trait;
use ps_service::delivery::{EventDirectory, EventSummary, HostRecord};
use ps_service::errors::PsError;
use ps_service::protocol::EventId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock `EventDirectory` for delivery tests.
#[derive(Debug, Clone, Default)]
pub struct MockEventDirectory {
    inner: Arc<Mutex<MockDirectoryInner>>,
    event_lookups: Arc<AtomicUsize>,
    host_lookups: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct MockDirectoryInner {
    events: HashMap<EventId, EventSummary>,
    hosts: HashMap<i64, HostRecord>,
    fail: bool,
}

impl MockEventDirectory {
    /// Empty directory: every lookup misses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory whose lookups all fail.
    #[must_use]
    pub fn failing() -> Self {
        let directory = Self::new();
        directory.inner.lock().unwrap().fail = true;
        directory
    }

    #[must_use]
    pub fn with_event(self, event_id: EventId, name: &str, host_id: Option<i64>) -> Self {
        self.inner.lock().unwrap().events.insert(
            event_id,
            EventSummary {
                event_id,
                name: name.to_string(),
                host_id,
            },
        );
        self
    }

    #[must_use]
    pub fn with_host(self, host_id: i64, email: &str) -> Self {
        self.inner.lock().unwrap().hosts.insert(
            host_id,
            HostRecord {
                id: host_id,
                email: email.to_string(),
            },
        );
        self
    }

    /// Number of `find_event` calls.
    #[must_use]
    pub fn event_lookups(&self) -> usize {
        self.event_lookups.load(Ordering::SeqCst)
    }

    /// Number of `find_host` calls.
    #[must_use]
    pub fn host_lookups(&self) -> usize {
        self.host_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventDirectory for MockEventDirectory {
    async fn find_event(&self, event_id: EventId) -> Result<Option<EventSummary>, PsError> {
        self.event_lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(PsError::Database("mock directory failure".to_string()));
        }
        Ok(inner.events.get(&event_id).cloned())
    }

    async fn find_host(&self, host_id: i64) -> Result<Option<HostRecord>, PsError> {
        self.host_lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(PsError::Database("mock directory failure".to_string()));
        }
        Ok(inner.hosts.get(&host_id).cloned())
    }
}
