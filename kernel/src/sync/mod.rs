//! Synchronisation primitives for intra-cluster sharing
//!
//! Structures shared by CPUs of the same cluster are guarded by
//! `IrqSpinLock`. Nothing here may be held across a cross-cluster wait.

pub mod spinlock;

pub use spinlock::{IrqSpinLock, IrqSpinLockGuard};
