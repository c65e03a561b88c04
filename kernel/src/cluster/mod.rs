//! Cluster registry
//!
//! Static description of the machine: which clusters exist, how many CPUs
//! each one has, where they sit in the mesh. Built once at boot, never
//! mutated structurally afterwards. Every "pointer" into it is a stable id.

pub mod registry;
pub mod topology;

pub use registry::{ClusterDescriptor, ClusterRegistry, CpuDescriptor};
pub use topology::{MeshRegion, Topology};

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::config::CPU_PER_CLUSTER_MAX;

/// Cluster identifier (index in the mesh, `x * y_size + y`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u16);

impl ClusterId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// CPU identifier local to its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CpuId(pub u8);

impl CpuId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Machine-wide CPU identifier: `cluster * CPU_PER_CLUSTER_MAX + local`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalCpuId(pub u16);

impl GlobalCpuId {
    pub const fn new(cluster: ClusterId, local: CpuId) -> Self {
        Self(cluster.0 * CPU_PER_CLUSTER_MAX as u16 + local.0 as u16)
    }

    #[inline]
    pub const fn cluster(self) -> ClusterId {
        ClusterId(self.0 / CPU_PER_CLUSTER_MAX as u16)
    }

    #[inline]
    pub const fn local(self) -> CpuId {
        CpuId((self.0 % CPU_PER_CLUSTER_MAX as u16) as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GlobalCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}.{}", self.cluster().0, self.local().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gid_round_trip() {
        let gid = GlobalCpuId::new(ClusterId(5), CpuId(3));
        assert_eq!(gid.cluster(), ClusterId(5));
        assert_eq!(gid.local(), CpuId(3));
        assert_eq!(gid.0 as usize, 5 * CPU_PER_CLUSTER_MAX + 3);
    }
}
