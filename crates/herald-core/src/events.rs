//! Delivery outcome notifications.
//!
//! A delivery client reports what happened to each event it was handed:
//! delivered, dropped, or discarded when the client gave up on its
//! destination. Handlers observe these without the client knowing who is
//! listening.
//!
//! ```text
//! ┌─────────────────┐   ClientEvent   ┌────────────────────┐
//! │  EventClient    │ ──────────────▶ │ MulticastHandler   │
//! └─────────────────┘                 └────────────────────┘
//!                                       │           │
//!                                       ▼           ▼
//!                                   metrics     audit log
//! ```

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SubscriptionId;

/// Notification emitted by a delivery client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// The destination answered a request with a 2xx status.
    Delivered(DeliveredEvent),

    /// An event left the client without being delivered.
    Dropped(DroppedEvent),

    /// The client entered a resting failure state and emptied its queue.
    Halted(HaltedEvent),
}

impl ClientEvent {
    /// Subscription the event belongs to.
    pub fn subscription_id(&self) -> &SubscriptionId {
        match self {
            Self::Delivered(e) => &e.subscription_id,
            Self::Dropped(e) => &e.subscription_id,
            Self::Halted(e) => &e.subscription_id,
        }
    }
}

/// Event emitted when a payload was accepted by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredEvent {
    /// Subscription that received the payload.
    pub subscription_id: SubscriptionId,

    /// Value of the payload's `Id` member, when it has one.
    pub event_id: Option<u64>,

    /// HTTP status code returned by the destination.
    pub status: u16,

    /// When the response was received.
    pub delivered_at: DateTime<Utc>,
}

/// Event emitted when a payload is discarded without delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEvent {
    /// Subscription the payload was meant for.
    pub subscription_id: SubscriptionId,

    /// Value of the payload's `Id` member, when it has one.
    pub event_id: Option<u64>,

    /// Why the payload was discarded.
    pub reason: DropReason,

    /// When the payload was discarded.
    pub dropped_at: DateTime<Utc>,
}

/// Reason a payload never reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Retries were exhausted and the policy skips to the next event.
    RetriesExhausted,
    /// The delivery queue was at capacity when the payload arrived.
    QueueFull,
    /// The client was terminated or suspended when the payload arrived.
    ClientInactive,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "retries exhausted"),
            Self::QueueFull => write!(f, "queue full"),
            Self::ClientInactive => write!(f, "client inactive"),
        }
    }
}

/// Event emitted when a client stops delivering to its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltedEvent {
    /// Subscription the client serves.
    pub subscription_id: SubscriptionId,

    /// Which resting state the client entered.
    pub outcome: HaltOutcome,

    /// Number of queued payloads discarded on entry.
    pub discarded: usize,

    /// When the client halted.
    pub halted_at: DateTime<Utc>,
}

/// Resting failure states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaltOutcome {
    /// Permanent; the client must be recreated.
    Terminated,
    /// Can be resumed by the owner.
    Suspended,
}

/// Trait for observing delivery outcomes.
///
/// The client awaits `handle_event` on its own task, so implementations
/// should return quickly and never fail back into delivery.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a client event.
    async fn handle_event(&self, event: ClientEvent);
}

/// Event handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: ClientEvent) {}
}

/// Forwards each event to every registered handler concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a new multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a handler to receive client events.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: ClientEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}
