//! Kernel-level errors
//!
//! `KernelError` wraps the subsystem errors so kernel services can use `?`
//! across subsystem boundaries, and maps them to POSIX error numbers for
//! the syscall layer.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::boot::BootError;
use crate::dqdt::DqdtError;
use crate::ipc::rpc::RpcError;
use crate::scheduler::SchedulerError;

/// POSIX error numbers returned to user space
pub mod errno {
    pub const ESRCH: i32 = 3;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelError {
    Sched(SchedulerError),
    Rpc(RpcError),
    Dqdt(DqdtError),
    Boot(BootError),
    /// CPU id outside the registry
    UnknownCpu { cpu: u16 },
    /// Idle and RPC manager threads belong to the kernel
    Reserved { thread_id: u32 },
    /// A Normal RPC came back without a response
    NoResponse,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sched(e) => write!(f, "scheduler: {}", e),
            Self::Rpc(e) => write!(f, "rpc: {}", e),
            Self::Dqdt(e) => write!(f, "dqdt: {}", e),
            Self::Boot(e) => write!(f, "boot: {}", e),
            Self::UnknownCpu { cpu } => write!(f, "unknown CPU {}", cpu),
            Self::Reserved { thread_id } => write!(f, "thread {} is reserved", thread_id),
            Self::NoResponse => write!(f, "RPC returned no response"),
        }
    }
}

impl KernelError {
    pub fn errno(&self) -> i32 {
        use self::errno::*;
        match self {
            Self::Dqdt(DqdtError::NoPlacement | DqdtError::RetryExhausted { .. }) => EAGAIN,
            Self::Sched(SchedulerError::ThreadTableFull { .. } | SchedulerError::EventTableFull { .. }) => ENOMEM,
            Self::Sched(SchedulerError::ThreadNotFound { .. }) | Self::UnknownCpu { .. } => ESRCH,
            Self::Sched(SchedulerError::MigrationNotAllowed { .. } | SchedulerError::CpuNotAvailable { .. })
            | Self::Rpc(RpcError::HandlerUnavailable { .. })
            | Self::Reserved { .. } => EBUSY,
            _ => EINVAL,
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::Sched(e) => e.recovery_hint(),
            Self::Rpc(e) => e.recovery_hint(),
            Self::Dqdt(e) => e.recovery_hint(),
            Self::Boot(e) => e.recovery_hint(),
            Self::UnknownCpu { .. } => "Check the CPU id against the cluster registry",
            Self::Reserved { .. } => "Only user and kernel worker threads can be managed",
            Self::NoResponse => "Endpoint priority and call site disagree",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Sched(e) => e.is_recoverable(),
            Self::Rpc(e) => e.is_recoverable(),
            Self::Dqdt(e) => e.is_recoverable(),
            Self::Boot(e) => e.is_recoverable(),
            Self::UnknownCpu { .. } | Self::Reserved { .. } | Self::NoResponse => false,
        }
    }

    pub fn should_log(&self) -> bool {
        match self {
            Self::Sched(e) => e.should_log(),
            Self::Rpc(e) => e.should_log(),
            Self::Dqdt(e) => e.should_log(),
            Self::Boot(e) => e.should_log(),
            _ => true,
        }
    }
}

impl From<SchedulerError> for KernelError {
    fn from(e: SchedulerError) -> Self {
        Self::Sched(e)
    }
}

impl From<RpcError> for KernelError {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<DqdtError> for KernelError {
    fn from(e: DqdtError) -> Self {
        Self::Dqdt(e)
    }
}

impl From<BootError> for KernelError {
    fn from(e: BootError) -> Self {
        Self::Boot(e)
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
