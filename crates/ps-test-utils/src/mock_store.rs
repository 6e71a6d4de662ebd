//! In-memory notification store.

use async_trait::async_trait;
use ps_service::delivery::{InAppNotification, NotificationStore};
use ps_service::errors::PsError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock `NotificationStore` for delivery tests.
#[derive(Debug, Clone, Default)]
pub struct MockNotificationStore {
    records: Arc<Mutex<Vec<InAppNotification>>>,
    call_count: Arc<AtomicUsize>,
    fail: bool,
}

impl MockNotificationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes all fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Notifications written so far.
    #[must_use]
    pub fn records(&self) -> Vec<InAppNotification> {
        self.records.lock().unwrap().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationStore for MockNotificationStore {
    async fn create(&self, notification: &InAppNotification) -> Result<(), PsError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PsError::Database("mock store failure".to_string()));
        }
        self.records.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
