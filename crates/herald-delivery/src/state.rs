//! Connection state of a delivery client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The single value that decides what a client does next.
///
/// `*InProgress` variants mark an outstanding asynchronous operation; while
/// one of them is current the dispatcher issues nothing new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnState {
    /// Freshly created, nothing attempted yet.
    #[default]
    Initialized,
    /// Waiting for name resolution.
    ResolveInProgress,
    /// Name resolution failed or returned nothing.
    ResolveFailed,
    /// Waiting for the TCP connect.
    ConnectInProgress,
    /// No endpoint accepted the connection.
    ConnectFailed,
    /// Waiting for the TLS handshake.
    HandshakeInProgress,
    /// TLS handshake failed.
    HandshakeFailed,
    /// Transport open, nothing sent yet.
    Connected,
    /// Writing a request.
    SendInProgress,
    /// Writing a request failed.
    SendFailed,
    /// Reading a response.
    RecvInProgress,
    /// Reading or validating a response failed.
    RecvFailed,
    /// Transport open and ready for the next request.
    Idle,
    /// Shutting the transport down.
    CloseInProgress,
    /// Transport closed, will resolve again when work arrives.
    Closed,
    /// Resting state after exhausting retries with the suspend policy.
    Suspended,
    /// Permanent state after exhausting retries with the terminate policy.
    Terminated,
    /// The peer declined keep-alive; the transport must be closed.
    AbortConnection,
    /// Retry wait finished or was requested explicitly.
    Retry,
}

impl ConnState {
    /// An asynchronous operation is outstanding.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::ResolveInProgress
                | Self::ConnectInProgress
                | Self::HandshakeInProgress
                | Self::SendInProgress
                | Self::RecvInProgress
                | Self::CloseInProgress
        )
    }

    /// The retry controller owns the next step.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::ResolveFailed
                | Self::ConnectFailed
                | Self::HandshakeFailed
                | Self::SendFailed
                | Self::RecvFailed
                | Self::Retry
        )
    }

    /// New payloads are rejected in this state.
    pub fn is_inactive(self) -> bool {
        matches!(self, Self::Suspended | Self::Terminated)
    }

    /// The camelCase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::ResolveInProgress => "resolveInProgress",
            Self::ResolveFailed => "resolveFailed",
            Self::ConnectInProgress => "connectInProgress",
            Self::ConnectFailed => "connectFailed",
            Self::HandshakeInProgress => "handshakeInProgress",
            Self::HandshakeFailed => "handshakeFailed",
            Self::Connected => "connected",
            Self::SendInProgress => "sendInProgress",
            Self::SendFailed => "sendFailed",
            Self::RecvInProgress => "recvInProgress",
            Self::RecvFailed => "recvFailed",
            Self::Idle => "idle",
            Self::CloseInProgress => "closeInProgress",
            Self::Closed => "closed",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::AbortConnection => "abortConnection",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
