//! End-of-stream handler that records every signal it receives.

use async_trait::async_trait;
use ps_service::delivery::EndOfStreamHandler;
use ps_service::detector::EndOfStreamSignal;
use ps_service::protocol::EventId;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Records signals in arrival order. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    signals: Arc<Mutex<Vec<EndOfStreamSignal>>>,
    notify: Arc<Notify>,
}

impl RecordingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signals(&self) -> Vec<EndOfStreamSignal> {
        self.signals.lock().unwrap().clone()
    }

    /// Signals received for one event.
    #[must_use]
    pub fn signals_for(&self, event_id: EventId) -> Vec<EndOfStreamSignal> {
        self.signals()
            .into_iter()
            .filter(|s| s.event_id == event_id)
            .collect()
    }

    /// Wait until at least `count` signals have been recorded.
    pub async fn wait_for(&self, count: usize) {
        while self.signals.lock().unwrap().len() < count {
            self.notify.notified().await;
        }
    }
}

#[async_trait]
impl EndOfStreamHandler for RecordingHandler {
    async fn on_end_of_stream(&self, signal: EndOfStreamSignal) {
        self.signals.lock().unwrap().push(signal);
        self.notify.notify_one();
    }
}
