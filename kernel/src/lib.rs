// src/lib.rs
// Point d'entrée de la bibliothèque du noyau
//
// ALMOS kernel core: the distributed placement and scheduling substrate
// shared by every cluster instance of the kernel.
//
// - `cluster`   : static registry of clusters and CPUs
// - `ipc::rpc`  : synchronous cross-cluster remote procedure calls
// - `scheduler` : per-CPU round-robin scheduler with migration support
// - `dqdt`      : distributed quaternary decision tree (placement)
// - `kernel`    : the service wiring the four together
#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Panic on a violated kernel invariant.
///
/// Reserved for logic bugs (double drain, negative counters); resource
/// limits are reported through `Result`.
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            panic!("[KERNEL CRITICAL] Invariant violated: {}", format_args!($($arg)+));
        }
    };
}

pub mod config;
pub mod logger;
pub mod arch;
pub mod sync;
pub mod cluster;
pub mod memory;
pub mod ipc;
pub mod scheduler;
pub mod dqdt;
pub mod boot;
pub mod kernel;

pub use boot::{boot, BootError};
pub use cluster::{ClusterId, ClusterRegistry, CpuId, GlobalCpuId, Topology};
pub use config::KernelConfig;
pub use dqdt::{Dqdt, DqdtError, Placement, PlacementKind, PlacementRequest};
pub use ipc::rpc::{RpcEndpoint, RpcError, RpcPriority, RpcTarget, RpcTransport};
pub use kernel::{ExecContext, Kernel, KernelError, KernelResult};
pub use scheduler::{SchedulerError, Thread, ThreadFlags, ThreadId, ThreadState, ThreadType};
