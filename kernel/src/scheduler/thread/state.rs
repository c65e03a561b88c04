//! State - Thread state machine
//!
//! ```text
//! Create ──elect──> RunningUser <──> RunningKernel ──deschedule──> Ready
//!    │                   │                 │  ^                      │
//!    └──elect (kernel)───┼────────────────>┘  └────────elect─────────┘
//!                        └──sleep──> Waiting ──wakeup──> Ready
//! any live state ──exit──> Dead
//! ```
//! Kernel, idle and boot threads never enter `RunningUser`.

use core::fmt;
use serde::{Deserialize, Serialize};

use super::thread::ThreadType;

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadState {
    /// Created, never elected
    Create = 0,
    /// Elected, executing user code
    RunningUser = 1,
    /// Elected, executing kernel code
    RunningKernel = 2,
    /// Descheduled but runnable
    Ready = 3,
    /// Sleeping until a wakeup
    Waiting = 4,
    /// Exited
    Dead = 5,
}

impl ThreadState {
    #[inline]
    pub fn is_running(self) -> bool {
        matches!(self, Self::RunningUser | Self::RunningKernel)
    }

    /// Can be picked by the next election
    #[inline]
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Create | Self::Ready)
    }

    #[inline]
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Dead)
    }

    /// Is `self -> to` a legal move for a thread of type `kind`?
    pub fn can_transition(self, to: ThreadState, kind: ThreadType) -> bool {
        use ThreadState::*;

        if to == RunningUser && kind != ThreadType::User {
            return false;
        }
        match (self, to) {
            (Create, RunningUser) | (Create, RunningKernel) => true,
            (RunningUser, RunningKernel) | (RunningKernel, RunningUser) => true,
            (RunningUser, Ready) | (RunningKernel, Ready) => true,
            (Ready, RunningKernel) => true,
            (RunningUser, Waiting) | (RunningKernel, Waiting) => true,
            (Waiting, Ready) => true,
            // Handed over to another CPU while queued
            (Create, Ready) => true,
            (from, Dead) => from != Dead,
            _ => false,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::RunningUser => write!(f, "RunningUser"),
            Self::RunningKernel => write!(f, "RunningKernel"),
            Self::Ready => write!(f, "Ready"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Dead => write!(f, "Dead"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_threads_never_run_user() {
        assert!(ThreadState::Create.can_transition(ThreadState::RunningUser, ThreadType::User));
        assert!(!ThreadState::Create.can_transition(ThreadState::RunningUser, ThreadType::Kernel));
        assert!(!ThreadState::RunningKernel.can_transition(ThreadState::RunningUser, ThreadType::Idle));
    }

    #[test]
    fn test_illegal_moves() {
        assert!(!ThreadState::Waiting.can_transition(ThreadState::RunningKernel, ThreadType::User));
        assert!(!ThreadState::Ready.can_transition(ThreadState::RunningUser, ThreadType::User));
        assert!(!ThreadState::Dead.can_transition(ThreadState::Dead, ThreadType::User));
        assert!(ThreadState::Waiting.can_transition(ThreadState::Dead, ThreadType::User));
    }
}
