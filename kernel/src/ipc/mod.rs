//! Inter-cluster communication
//!
//! - `core`: bounded lock-free MPMC ring, the building block of remote FIFOs
//! - `rpc`:  synchronous remote procedure calls between kernel instances

pub mod core;
pub mod rpc;
