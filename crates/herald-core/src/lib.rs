//! Core domain types shared by the delivery client and its callers.
//!
//! Provides the destination model, outcome notifications, the clock
//! abstraction, and error handling. The delivery crate and the binary both
//! build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    ClientEvent, DeliveredEvent, DropReason, DroppedEvent, EventHandler, HaltOutcome, HaltedEvent,
    MulticastEventHandler, NoOpEventHandler,
};
pub use models::{Destination, Scheme, SubscriptionId};
pub use time::{Clock, RealClock, TestClock};
