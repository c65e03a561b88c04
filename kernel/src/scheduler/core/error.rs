//! Scheduler Error Handling
//!
//! Typed errors with recovery hints. Every variant is plain data so the
//! error can travel back through an RPC response.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::scheduler::thread::ThreadState;

/// Scheduler error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerError {
    // ═══════════════════════════════════════════════════════════════
    // Resource Errors
    // ═══════════════════════════════════════════════════════════════

    /// Local thread table of the CPU is full
    ThreadTableFull { cpu: u16, max: usize },

    /// Event slot table of the CPU is full
    EventTableFull { cpu: u16 },

    // ═══════════════════════════════════════════════════════════════
    // Thread Errors
    // ═══════════════════════════════════════════════════════════════

    /// Thread not owned by this CPU
    ThreadNotFound { thread_id: u32 },

    /// Thread already registered on this CPU
    ThreadAlreadyExists { thread_id: u32 },

    /// Invalid thread state transition
    InvalidStateTransition {
        thread_id: u32,
        from: ThreadState,
        to: ThreadState,
    },

    /// Operation needs the thread to be the running one
    NotCurrent { thread_id: u32 },

    /// Thread cannot migrate (pinned or already exported)
    MigrationNotAllowed { thread_id: u32 },

    // ═══════════════════════════════════════════════════════════════
    // CPU Errors
    // ═══════════════════════════════════════════════════════════════

    /// CPU not present in the registry
    CpuNotAvailable { cpu: u16 },

    // ═══════════════════════════════════════════════════════════════
    // Internal Errors (should never happen)
    // ═══════════════════════════════════════════════════════════════

    /// Queues and thread table disagree
    InternalError { thread_id: u32 },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadTableFull { cpu, max } => {
                write!(f, "Thread table of cpu {} full ({} slots)", cpu, max)
            }
            Self::EventTableFull { cpu } => write!(f, "Event table of cpu {} full", cpu),
            Self::ThreadNotFound { thread_id } => write!(f, "Thread {} not found", thread_id),
            Self::ThreadAlreadyExists { thread_id } => {
                write!(f, "Thread {} already registered", thread_id)
            }
            Self::InvalidStateTransition { thread_id, from, to } => {
                write!(f, "Thread {}: invalid transition {} -> {}", thread_id, from, to)
            }
            Self::MigrationNotAllowed { thread_id } => {
                write!(f, "Thread {} cannot migrate", thread_id)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

impl SchedulerError {
    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::ThreadTableFull { .. } => "Place the thread on another CPU",
            Self::EventTableFull { .. } => "Retry once the target CPU has ticked",
            Self::ThreadNotFound { .. } => "Thread may have exited or migrated",
            Self::InvalidStateTransition { .. } => "Check thread lifecycle management",
            Self::MigrationNotAllowed { .. } => "Thread is pinned or already handed off",
            Self::CpuNotAvailable { .. } => "Check the target against the cluster registry",
            _ => "Check scheduler configuration",
        }
    }

    /// Is this a recoverable error?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InternalError { .. })
    }

    /// Should this error be logged?
    pub fn should_log(&self) -> bool {
        match self {
            Self::ThreadNotFound { .. } => false, // Common during exit/migration races
            Self::EventTableFull { .. } => false, // Caller retries
            _ => true,
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Log a scheduler error with its hint, then yield it
#[macro_export]
macro_rules! sched_error {
    ($err:expr) => {{
        let err = $err;
        if err.should_log() {
            log::error!("sched: {} (hint: {})", err, err.recovery_hint());
        }
        err
    }};
}
