//! Event handler that records client events for assertions.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use herald_core::{ClientEvent, DropReason, EventHandler, HaltOutcome};
use tokio::sync::Notify;

/// Default wait before a test gives up on expected events.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Records every `ClientEvent` it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<ClientEvent>>,
    notify: Notify,
}

impl RecordingEventHandler {
    /// Creates a shared recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Number of events received so far.
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or_default()
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event ids of delivered payloads, in delivery order.
    pub fn delivered_ids(&self) -> Vec<Option<u64>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Delivered(e) => Some(e.event_id),
                _ => None,
            })
            .collect()
    }

    /// Reasons of dropped payloads, in order.
    pub fn drop_reasons(&self) -> Vec<DropReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Dropped(e) => Some(e.reason),
                _ => None,
            })
            .collect()
    }

    /// Outcomes of halt events, in order.
    pub fn halts(&self) -> Vec<HaltOutcome> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Halted(e) => Some(e.outcome),
                _ => None,
            })
            .collect()
    }

    /// Waits until at least `count` events were recorded.
    ///
    /// # Panics
    ///
    /// Panics after `DEFAULT_EVENT_TIMEOUT`.
    pub async fn wait_for_events(&self, count: usize) {
        let result = tokio::time::timeout(DEFAULT_EVENT_TIMEOUT, async {
            loop {
                let notified = self.notify.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;

        assert!(
            result.is_ok(),
            "expected {count} client events within {DEFAULT_EVENT_TIMEOUT:?}, got {}",
            self.len()
        );
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: ClientEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        self.notify.notify_waiters();
    }
}
