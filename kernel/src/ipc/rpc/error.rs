//! RPC error types

use core::fmt;
use serde::{Deserialize, Serialize};

/// Errors reported by the RPC transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcError {
    /// No handler registered under this id
    UnknownEndpoint { id: u16 },
    /// Two endpoints claimed the same id
    EndpointAlreadyRegistered { id: u16 },
    /// Target CPU or cluster does not exist
    InvalidTarget,
    /// Request or response could not be marshalled
    Encode,
    /// Request or response could not be unmarshalled
    Decode,
    /// Caller's endpoint type disagrees with the registered handler
    PriorityMismatch { id: u16 },
    /// Handler could not reach the kernel state it serves
    HandlerUnavailable { id: u16 },
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEndpoint { id } => write!(f, "unknown RPC endpoint {}", id),
            Self::EndpointAlreadyRegistered { id } => write!(f, "RPC endpoint {} already registered", id),
            Self::InvalidTarget => write!(f, "invalid RPC target"),
            Self::Encode => write!(f, "RPC marshalling failed"),
            Self::Decode => write!(f, "RPC unmarshalling failed"),
            Self::PriorityMismatch { id } => write!(f, "RPC endpoint {} priority mismatch", id),
            Self::HandlerUnavailable { id } => write!(f, "RPC endpoint {} has no kernel to serve", id),
        }
    }
}

impl RpcError {
    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::UnknownEndpoint { .. } => "Register the endpoint at boot on every cluster",
            Self::EndpointAlreadyRegistered { .. } => "Give each endpoint a distinct RpcId",
            Self::InvalidTarget => "Check the target against the cluster registry",
            Self::Encode | Self::Decode => "Check request/response types of the endpoint",
            Self::PriorityMismatch { .. } => "Use the endpoint type that was registered",
            Self::HandlerUnavailable { .. } => "Kernel is shutting down",
        }
    }

    /// Configuration errors are not worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::HandlerUnavailable { .. })
    }

    pub fn should_log(&self) -> bool {
        true
    }
}

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;
