//! IPC Core - lock-free building blocks
//!
//! Remote FIFOs are multi-producer (any CPU of any cluster may push) and
//! multi-consumer (whichever thread holds the listener token pops), so the
//! ring is a bounded MPMC queue with per-slot sequence numbers.

pub mod mpmc_ring;
pub mod sequence;

pub use mpmc_ring::MpmcRing;
pub use sequence::CacheLineCounter;
