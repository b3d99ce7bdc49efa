//! Herald binary support: configuration loading for a single delivery client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;

pub use config::Config;
