//! Error types for the network layer.

use std::time::Duration;

use strand_core::CycleError;
use thiserror::Error;

use crate::sync::SyncState;
use crate::transport::NodeId;
use crate::wire::WireError;

/// Error codes carried by the `Err` sync message.
///
/// Every handshake-fatal [`NetError`] maps to one of these via
/// [`NetError::code`]; unknown codes received from a peer decode as
/// [`ErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Code not recognized by this build.
    Unknown,
    /// A `ConnRequest` named an instance that does not exist.
    InstanceNotFound,
    /// A `ConnRequest` named a variable that does not exist.
    VariableNotFound,
    /// A `ConnRequest` named a variable that cannot receive events.
    VariableTypeError,
    /// A node label could not be resolved.
    NetNodeNotFound,
    /// Sending or receiving a datagram failed.
    TransportFailed,
    /// A datagram could not be decoded.
    SerializationFailed,
    /// The handshake did not finish within the sync policy timeout.
    SyncTimeout,
    /// The handshake was cancelled locally.
    Cancelled,
}

impl ErrorCode {
    /// Wire representation.
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::InstanceNotFound => 1,
            Self::VariableNotFound => 2,
            Self::VariableTypeError => 3,
            Self::NetNodeNotFound => 4,
            Self::TransportFailed => 5,
            Self::SerializationFailed => 6,
            Self::SyncTimeout => 7,
            Self::Cancelled => 8,
        }
    }

    /// Parses the wire representation.
    pub const fn from_u32(code: u32) -> Self {
        match code {
            1 => Self::InstanceNotFound,
            2 => Self::VariableNotFound,
            3 => Self::VariableTypeError,
            4 => Self::NetNodeNotFound,
            5 => Self::TransportFailed,
            6 => Self::SerializationFailed,
            7 => Self::SyncTimeout,
            8 => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::InstanceNotFound => "instance not found",
            Self::VariableNotFound => "variable not found",
            Self::VariableTypeError => "variable type error",
            Self::NetNodeNotFound => "node not found",
            Self::TransportFailed => "transport failed",
            Self::SerializationFailed => "serialization failed",
            Self::SyncTimeout => "sync timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors raised by the network layer and [`Session`](crate::Session).
#[derive(Debug, Error)]
pub enum NetError {
    /// No node in the roster has this label.
    #[error("network node '{0}' not found")]
    NetNodeNotFound(String),

    /// A remote connection names the local node as its target.
    #[error("remote connection targets the local node '{0}'")]
    LocalTarget(String),

    /// The transport could not send or receive.
    #[error("network transport failed")]
    NetTransportFailed(#[source] std::io::Error),

    /// The sync worker thread could not be started or reached.
    #[error("sync worker control failed: {0}")]
    ThreadControlFailed(&'static str),

    /// A datagram could not be encoded or decoded.
    #[error("datagram serialization failed")]
    SerializationFailed(#[from] WireError),

    /// A peer broadcast `Err`.
    #[error("node {node} reported a protocol error: {code}")]
    ProtocolError {
        /// Node that sent the error.
        node: NodeId,
        /// Code it sent.
        code: ErrorCode,
    },

    /// The handshake was cancelled before it finished.
    #[error("network sync was cancelled")]
    Cancelled,

    /// The handshake did not finish in time.
    #[error("network sync timed out after {0:?}")]
    SyncTimeout(Duration),

    /// The operation is not valid in the current sync state.
    #[error("cannot {op} while sync state is {state}")]
    InvalidState {
        /// Operation attempted.
        op: &'static str,
        /// State the session was in.
        state: SyncState,
    },

    /// A graph operation failed.
    #[error(transparent)]
    Graph(#[from] strand_core::Error),

    /// One or more instances failed during a cycle.
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

impl NetError {
    /// The wire code broadcast to peers when this error is fatal to a
    /// handshake.
    pub fn code(&self) -> ErrorCode {
        use strand_core::Error as G;
        match self {
            Self::NetNodeNotFound(_) | Self::LocalTarget(_) => ErrorCode::NetNodeNotFound,
            Self::NetTransportFailed(_) => ErrorCode::TransportFailed,
            Self::SerializationFailed(_) => ErrorCode::SerializationFailed,
            Self::ProtocolError { code, .. } => *code,
            Self::SyncTimeout(_) => ErrorCode::SyncTimeout,
            Self::Cancelled | Self::ThreadControlFailed(_) => ErrorCode::Cancelled,
            Self::Graph(G::InstanceNotFound(_)) => ErrorCode::InstanceNotFound,
            Self::Graph(G::VariableNotFound { .. }) => ErrorCode::VariableNotFound,
            Self::Graph(G::VariableTypeError { .. }) => ErrorCode::VariableTypeError,
            Self::Graph(_) | Self::Cycle(_) | Self::InvalidState { .. } => ErrorCode::Unknown,
        }
    }
}

/// Result alias for network operations.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_survive_the_wire() {
        for code in [
            ErrorCode::InstanceNotFound,
            ErrorCode::VariableNotFound,
            ErrorCode::VariableTypeError,
            ErrorCode::NetNodeNotFound,
            ErrorCode::TransportFailed,
            ErrorCode::SerializationFailed,
            ErrorCode::SyncTimeout,
            ErrorCode::Cancelled,
        ] {
            assert_eq!(ErrorCode::from_u32(code.to_u32()), code);
        }
        assert_eq!(ErrorCode::from_u32(999), ErrorCode::Unknown);
    }

    #[test]
    fn graph_errors_map_to_codes() {
        let err = NetError::from(strand_core::Error::InstanceNotFound("Osc1".into()));
        assert_eq!(err.code(), ErrorCode::InstanceNotFound);
        assert_eq!(err.to_string(), "instance 'Osc1' not found");

        let err = NetError::SyncTimeout(Duration::from_secs(1));
        assert_eq!(err.code(), ErrorCode::SyncTimeout);
    }
}
