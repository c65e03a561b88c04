//! DQDT errors

use core::fmt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DqdtError {
    /// Every strategy failed up to the root (EAGAIN class)
    NoPlacement,
    /// Cluster has no leaf in the tree
    InvalidCluster { cluster: u16 },
    /// Commits kept conflicting; surfaces as `NoPlacement` to callers
    RetryExhausted { attempts: u32 },
}

impl fmt::Display for DqdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPlacement => write!(f, "no placement found"),
            Self::InvalidCluster { cluster } => write!(f, "cluster {} not in the decision tree", cluster),
            Self::RetryExhausted { attempts } => write!(f, "placement conflicted {} times", attempts),
        }
    }
}

impl DqdtError {
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::NoPlacement | Self::RetryExhausted { .. } => "Retry after load decreases",
            Self::InvalidCluster { .. } => "Check the origin against the cluster registry",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidCluster { .. })
    }

    pub fn should_log(&self) -> bool {
        // Placement failures are expected under load
        matches!(self, Self::InvalidCluster { .. })
    }
}

pub type DqdtResult<T> = Result<T, DqdtError>;
