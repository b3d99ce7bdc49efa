//! Error types for event delivery.
//!
//! Every failure the transport or the response parser can produce has a
//! variant here. None of these reach the caller of `enqueue`: the connection
//! state machine logs them and routes the client into the matching failure
//! state, where the retry controller takes over.

use std::fmt;

use thiserror::Error;

use crate::state::ConnState;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failures observed while delivering a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Name resolution failed.
    #[error("failed to resolve {host}: {message}")]
    Resolve {
        /// Host that was looked up
        host: String,
        /// Resolver error message
        message: String,
    },

    /// Name resolution succeeded but returned no addresses.
    #[error("no endpoints found for {host}")]
    NoEndpoints {
        /// Host that was looked up
        host: String,
    },

    /// No endpoint accepted the TCP connection.
    #[error("connect failed: {message}")]
    Connect {
        /// Error message of the last failed endpoint
        message: String,
    },

    /// An operation did not complete within its deadline.
    #[error("{operation} timed out after {timeout_seconds}s")]
    Timeout {
        /// Which operation timed out
        operation: &'static str,
        /// Configured deadline in seconds
        timeout_seconds: u64,
    },

    /// TLS handshake failed.
    #[error("tls handshake failed: {message}")]
    Tls {
        /// Error message from the TLS layer
        message: String,
    },

    /// A send was attempted with no open transport.
    #[error("no open transport")]
    NotConnected,

    /// Writing the request failed.
    #[error("write failed: {message}")]
    Write {
        /// I/O error message
        message: String,
    },

    /// Reading the response failed.
    #[error("read failed: {message}")]
    Read {
        /// I/O error message
        message: String,
    },

    /// The peer closed the stream before a full response arrived.
    #[error("connection closed before the response was complete")]
    IncompleteResponse,

    /// The response body exceeded the configured ceiling.
    #[error("response body exceeds {limit} bytes")]
    BodyLimitExceeded {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The response head exceeded the header buffer.
    #[error("response headers exceed {limit} bytes")]
    HeaderLimitExceeded {
        /// Header buffer size in bytes
        limit: usize,
    },

    /// The response could not be parsed as HTTP/1.x.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// Parser error message
        message: String,
    },

    /// The destination answered with a status outside 200..300.
    #[error("unexpected HTTP status {status_code}")]
    HttpStatus {
        /// Status code returned by the destination
        status_code: u16,
    },

    /// Client configuration is invalid.
    #[error("invalid client configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// The client actor has stopped.
    #[error("event client has shut down")]
    ClientClosed,
}

impl DeliveryError {
    /// Creates a resolve error.
    pub fn resolve(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve { host: host.into(), message: message.into() }
    }

    /// Creates a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect { message: message.into() }
    }

    /// Creates a timeout error for the named operation.
    pub fn timeout(operation: &'static str, timeout_seconds: u64) -> Self {
        Self::Timeout { operation, timeout_seconds }
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls { message: message.into() }
    }

    /// Creates a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write { message: message.into() }
    }

    /// Creates a read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read { message: message.into() }
    }

    /// Creates a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether the retry controller should handle this failure.
    ///
    /// Transport and protocol failures are retryable; configuration errors
    /// and a stopped client are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration { .. } | Self::ClientClosed => false,
            _ => true,
        }
    }
}

/// Category of delivery error, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Name resolution.
    Resolve,
    /// TCP connectivity and timeouts.
    Network,
    /// TLS handshake.
    Tls,
    /// Request transmission.
    Write,
    /// Response transport.
    Read,
    /// Response framing or status.
    Protocol,
    /// Configuration problems.
    Configuration,
    /// Client lifecycle.
    Lifecycle,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Resolve { .. } | DeliveryError::NoEndpoints { .. } => Self::Resolve,
            DeliveryError::Connect { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::Tls { .. } => Self::Tls,
            DeliveryError::NotConnected | DeliveryError::Write { .. } => Self::Write,
            DeliveryError::Read { .. } | DeliveryError::IncompleteResponse => Self::Read,
            DeliveryError::BodyLimitExceeded { .. }
            | DeliveryError::HeaderLimitExceeded { .. }
            | DeliveryError::MalformedResponse { .. }
            | DeliveryError::HttpStatus { .. } => Self::Protocol,
            DeliveryError::Configuration { .. } => Self::Configuration,
            DeliveryError::ClientClosed => Self::Lifecycle,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::Network => write!(f, "network"),
            Self::Tls => write!(f, "tls"),
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
            Self::Protocol => write!(f, "protocol"),
            Self::Configuration => write!(f, "configuration"),
            Self::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

/// Why a payload was not accepted into the delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueRejected {
    /// The client is suspended or terminated.
    #[error("client is {0}")]
    Inactive(ConnState),

    /// The queue already holds `capacity` payloads.
    #[error("queue is full ({capacity} payloads)")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },
}

impl From<EnqueueRejected> for herald_core::DropReason {
    fn from(rejected: EnqueueRejected) -> Self {
        match rejected {
            EnqueueRejected::Inactive(_) => Self::ClientInactive,
            EnqueueRejected::QueueFull { .. } => Self::QueueFull,
        }
    }
}
