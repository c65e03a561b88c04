//! Scheduler subsystem
//!
//! Per-CPU round-robin scheduling with cooperative, clock-driven load
//! balancing. Each CPU owns its run queues; other CPUs reach them only
//! through the event table (same cluster) or an RPC (other clusters).

pub mod core;
pub mod thread;

pub use self::core::{
    CpuScheduler, EventTable, Export, Handoff, LoadOracle, NoBalancing, QueueKind, SchedEvent, SchedulerError,
    SchedulerResult, SchedulerStats,
};
pub use thread::{Thread, ThreadFlags, ThreadId, ThreadState, ThreadType};

use crate::cluster::GlobalCpuId;

/// Who is executing: the CPU and the thread it currently runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    pub cpu: GlobalCpuId,
    pub thread: ThreadId,
}

impl ExecContext {
    pub const fn new(cpu: GlobalCpuId, thread: ThreadId) -> Self {
        Self { cpu, thread }
    }
}
