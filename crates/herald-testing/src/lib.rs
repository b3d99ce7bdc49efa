//! Test infrastructure for herald delivery clients.
//!
//! Provides a scriptable subscriber, resolver and connector doubles, an
//! event recorder and deadline-bounded waits, so client tests run against
//! real sockets on localhost without DNS or external services.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod events;
pub mod fixtures;
pub mod http;
pub mod subscriber;
pub mod transport;
pub mod wait;

pub use events::RecordingEventHandler;
pub use fixtures::{destination, event_payload, fast_config, payloads};
pub use herald_core::TestClock;
pub use http::MockServer;
pub use subscriber::{MockSubscriber, RecordedRequest, Reply};
pub use transport::{FailingResolver, ScriptedConnector, StallingConnector, StaticResolver};
pub use wait::{wait_for_drained, wait_for_snapshot, wait_for_state, wait_until};
