//! Scheduler core module
//!
//! - `scheduler`:    per-CPU run queues, election, clock, migration hand-off
//! - `runqueue`:     the three per-CPU lists
//! - `loadbalancer`: eligibility and victim selection
//! - `events`:       lock-free cross-CPU event slots
//! - `statistics`:   per-CPU counters

pub mod error;
pub mod events;
pub mod loadbalancer;
pub mod runqueue;
pub mod scheduler;
pub mod statistics;

pub use error::{SchedulerError, SchedulerResult};
pub use events::{EventTable, SchedEvent};
pub use loadbalancer::{Export, LoadOracle, NoBalancing};
pub use runqueue::{QueueKind, RunQueue};
pub use scheduler::{CpuScheduler, Handoff};
pub use statistics::SchedulerStats;
