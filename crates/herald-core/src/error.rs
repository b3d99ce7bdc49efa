//! Error types for destination and header validation.
//!
//! Delivery failures live in `herald-delivery`; this module only covers the
//! mistakes that can be made while describing where events should go.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for destination construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The destination URL could not be parsed.
    #[error("invalid destination url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Only `http` and `https` destinations are supported.
    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    /// A subscriber-supplied header is not a valid HTTP header.
    #[error("invalid header '{name}': {reason}")]
    InvalidHeader {
        /// Header name as supplied
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Destination fields are inconsistent (empty host, relative path).
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
}

impl CoreError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into(), reason: reason.into() }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into(), reason: reason.into() }
    }
}
