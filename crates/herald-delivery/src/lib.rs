//! Outbound event delivery to a single HTTP(S) subscriber.
//!
//! Each `EventClient` owns one destination: a bounded FIFO of JSON payloads,
//! one persistent connection, and a retry policy. Payloads are delivered in
//! order, one request at a time, and leave the queue only after a 2xx
//! response or when the retry policy gives up on them.
//!
//! # Architecture
//!
//! The client is split into a pure state machine and an async driver:
//!
//! 1. **`ConnectionMachine`** - owns `ConnState`, the queue and the retry
//!    budget, and returns the next `Action` after every event
//! 2. **Transport** - `Resolver` and `Connector` traits with DNS, TCP and
//!    rustls implementations
//! 3. **Pipeline** - request encoding and a bounded `httparse` response
//!    reader
//! 4. **`EventClient`** - a spawned task performing one action at a time and
//!    feeding completions back into the machine
//!
//! # Example
//!
//! ```no_run
//! use herald_core::Destination;
//! use herald_delivery::{ClientConfig, EventClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let destination = Destination::from_url("1", "https://listener.example.com/events", &[])?;
//! let client = EventClient::new(destination, ClientConfig::default())?;
//!
//! client.configure_retry_policy(3, 30)?;
//! client.set_retry_policy_action("SuspendRetries")?;
//! client.enqueue(r#"{"Id":1,"Events":[]}"#)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod machine;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod state;
pub mod transport;

pub use client::{ClientConfig, EventClient, EventClientBuilder};
pub use error::{DeliveryError, EnqueueRejected, ErrorCategory, Result};
pub use machine::{Action, ClientSnapshot, ConnectionMachine};
pub use pipeline::{ResponseHead, DEFAULT_RESPONSE_BODY_LIMIT};
pub use queue::{DeliveryQueue, DEFAULT_QUEUE_CAPACITY};
pub use retry::{RetryController, RetryDecision, RetryPolicy, RetryPolicyAction};
pub use state::ConnState;
pub use transport::{BoxedStream, Connector, DnsResolver, Resolver, TcpConnector};

/// Default connect and handshake deadline in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;

/// Default request write and response read deadline in seconds.
pub const DEFAULT_RESPONSE_TIMEOUT_SECONDS: u64 = 30;
