//! Registry - cluster and CPU descriptor tables
//!
//! The registry owns one `ClusterDescriptor` per cluster and one
//! `CpuDescriptor` per core. Descriptors never move; the dynamic fields
//! (usage, live thread count, in-kernel flag) are atomics readable from any
//! cluster through the remote word helpers.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use super::{ClusterId, CpuId, GlobalCpuId, MeshRegion, Topology};
use crate::arch::remote::{remote_lw, remote_sw};
use crate::boot::BootError;
use crate::dqdt::NodeId;

/// Per-core descriptor
#[derive(Debug)]
pub struct CpuDescriptor {
    gid: GlobalCpuId,
    lid: CpuId,
    cluster: ClusterId,
    /// Dense index of this CPU in per-CPU arenas
    slot: usize,
    /// Decayed running average of busy time (0-100)
    usage: AtomicU8,
    /// Busy time over the last balancing period (0-100)
    busy_percent: AtomicU8,
    /// Set while the CPU executes kernel code
    in_kernel: AtomicBool,
    /// Threads currently owned by this CPU (idle excluded)
    threads: AtomicU32,
}

impl CpuDescriptor {
    fn new(cluster: ClusterId, lid: CpuId, slot: usize) -> Self {
        Self {
            gid: GlobalCpuId::new(cluster, lid),
            lid,
            cluster,
            slot,
            usage: AtomicU8::new(0),
            busy_percent: AtomicU8::new(0),
            in_kernel: AtomicBool::new(false),
            threads: AtomicU32::new(0),
        }
    }

    pub fn gid(&self) -> GlobalCpuId {
        self.gid
    }

    pub fn lid(&self) -> CpuId {
        self.lid
    }

    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn usage(&self) -> u8 {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn busy_percent(&self) -> u8 {
        self.busy_percent.load(Ordering::Relaxed)
    }

    /// Publish the usage figures computed by the CPU's scheduler
    pub fn set_usage(&self, usage: u8, busy_percent: u8) {
        self.usage.store(usage.min(100), Ordering::Relaxed);
        self.busy_percent.store(busy_percent.min(100), Ordering::Relaxed);
    }

    /// Remote read of the in-kernel flag
    pub fn in_kernel(&self) -> bool {
        remote_lw(&self.in_kernel, self.cluster)
    }

    pub fn set_in_kernel(&self, value: bool) {
        remote_sw(&self.in_kernel, self.cluster, value)
    }

    pub fn threads(&self) -> u32 {
        self.threads.load(Ordering::Relaxed)
    }

    pub fn thread_added(&self) {
        self.threads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn thread_removed(&self) {
        let prev = self.threads.fetch_sub(1, Ordering::Relaxed);
        kernel_assert!(prev > 0, "thread count of {} went negative", self.gid);
    }
}

/// Per-cluster descriptor
#[derive(Debug)]
pub struct ClusterDescriptor {
    id: ClusterId,
    x: u8,
    y: u8,
    cpus: Vec<CpuDescriptor>,
    dqdt_leaf: spin::Once<NodeId>,
}

impl ClusterDescriptor {
    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn coords(&self) -> (u8, u8) {
        (self.x, self.y)
    }

    pub fn region(&self) -> MeshRegion {
        MeshRegion::point(self.x, self.y)
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpus(&self) -> &[CpuDescriptor] {
        &self.cpus
    }

    pub fn cpu(&self, lid: CpuId) -> Option<&CpuDescriptor> {
        self.cpus.get(lid.index())
    }

    /// Average usage of the cluster's CPUs (0-100)
    pub fn usage(&self) -> u8 {
        if self.cpus.is_empty() {
            return 0;
        }
        let sum: u32 = self.cpus.iter().map(|c| c.usage() as u32).sum();
        (sum / self.cpus.len() as u32) as u8
    }

    /// Least loaded CPU (fewest threads, then lowest usage, then lowest id)
    pub fn least_loaded_cpu(&self, exclude: Option<GlobalCpuId>) -> Option<&CpuDescriptor> {
        self.cpus
            .iter()
            .filter(|c| Some(c.gid) != exclude)
            .min_by_key(|c| (c.threads(), c.usage(), c.lid))
    }

    /// DQDT leaf representing this cluster (set once the tree is built)
    pub fn dqdt_leaf(&self) -> Option<NodeId> {
        self.dqdt_leaf.get().copied()
    }

    pub(crate) fn attach_dqdt_leaf(&self, leaf: NodeId) {
        self.dqdt_leaf.call_once(|| leaf);
    }
}

/// Static table of every cluster and CPU of the machine
#[derive(Debug)]
pub struct ClusterRegistry {
    topology: Topology,
    clusters: Vec<ClusterDescriptor>,
    cpu_total: usize,
}

impl ClusterRegistry {
    pub fn from_topology(topology: Topology) -> Result<Self, BootError> {
        topology.validate()?;

        let mut clusters = Vec::with_capacity(topology.cluster_count());
        let mut slot = 0;
        for cid in 0..topology.cluster_count() {
            let id = ClusterId(cid as u16);
            let (x, y) = topology.coords(id);
            let cpus = (0..topology.cpu_count(id))
                .map(|lid| {
                    let cpu = CpuDescriptor::new(id, CpuId(lid as u8), slot);
                    slot += 1;
                    cpu
                })
                .collect();
            clusters.push(ClusterDescriptor {
                id,
                x,
                y,
                cpus,
                dqdt_leaf: spin::Once::new(),
            });
        }

        log::info!(
            "registry: {}x{} mesh, {} clusters, {} cpus",
            topology.x_size(),
            topology.y_size(),
            clusters.len(),
            slot
        );

        Ok(Self {
            topology,
            clusters,
            cpu_total: slot,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn cpu_count(&self, cluster: ClusterId) -> usize {
        self.cluster(cluster).map(|c| c.cpu_count()).unwrap_or(0)
    }

    /// CPUs in the whole machine
    pub fn cpu_total(&self) -> usize {
        self.cpu_total
    }

    pub fn cluster(&self, cluster: ClusterId) -> Option<&ClusterDescriptor> {
        self.clusters.get(cluster.index())
    }

    pub fn clusters(&self) -> impl Iterator<Item = &ClusterDescriptor> {
        self.clusters.iter()
    }

    pub fn cpu(&self, gid: GlobalCpuId) -> Option<&CpuDescriptor> {
        self.cluster(gid.cluster())?.cpu(gid.local())
    }

    pub fn cpus(&self) -> impl Iterator<Item = &CpuDescriptor> {
        self.clusters.iter().flat_map(|c| c.cpus.iter())
    }

    /// Dense index of `gid` in per-CPU arenas
    pub fn cpu_slot(&self, gid: GlobalCpuId) -> Option<usize> {
        self.cpu(gid).map(|c| c.slot)
    }

    pub fn topology_distance(&self, a: ClusterId, b: ClusterId) -> u32 {
        self.topology.distance(a, b)
    }
}
