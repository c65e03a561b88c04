//! Thread descriptor
//!
//! Only the part of the thread the placement/scheduling core needs:
//! identity, type, state, quantum, balancing priority, flags and the CPU
//! that currently owns it. Register context and stacks belong to the
//! architecture port.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use serde::{Deserialize, Serialize};

use super::flags::ThreadFlags;
use super::state::ThreadState;
use crate::cluster::GlobalCpuId;

/// Thread identifier, unique machine-wide (0 is never allocated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

impl ThreadId {
    /// Allocate a fresh id
    pub fn alloc() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Thread type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadType {
    User,
    Kernel,
    Idle,
    Boot,
}

impl ThreadType {
    /// Serviced from the `kthreads` list
    #[inline]
    pub fn is_kernel(self) -> bool {
        !matches!(self, Self::User)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    id: ThreadId,
    kind: ThreadType,
    pub(crate) state: ThreadState,
    /// Ticks left before a reschedule is requested
    pub(crate) quantum: u32,
    /// Load-balancing score, grows while running, halved every pass
    pub(crate) boosted_prio: u32,
    pub(crate) flags: ThreadFlags,
    /// CPU that owns the thread
    pub(crate) cpu: GlobalCpuId,
    /// Destination chosen by the balancer
    pub(crate) migrate_to: Option<GlobalCpuId>,
    /// Ticks spent running since creation
    pub(crate) ticks: u64,
}

impl Thread {
    pub fn new(kind: ThreadType, cpu: GlobalCpuId) -> Self {
        let flags = match kind {
            ThreadType::User => ThreadFlags::USER_DEFAULT,
            _ => ThreadFlags::empty(),
        };
        Self {
            id: ThreadId::alloc(),
            kind,
            state: ThreadState::Create,
            quantum: 0,
            boosted_prio: 0,
            flags,
            cpu,
            migrate_to: None,
            ticks: 0,
        }
    }

    pub fn user(cpu: GlobalCpuId) -> Self {
        Self::new(ThreadType::User, cpu)
    }

    pub fn kernel(cpu: GlobalCpuId) -> Self {
        Self::new(ThreadType::Kernel, cpu)
    }

    pub fn with_flags(mut self, flags: ThreadFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn kind(&self) -> ThreadType {
        self.kind
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn boosted_prio(&self) -> u32 {
        self.boosted_prio
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn cpu(&self) -> GlobalCpuId {
        self.cpu
    }

    pub fn migrate_to(&self) -> Option<GlobalCpuId> {
        self.migrate_to
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
