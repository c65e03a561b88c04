//! DQDT - Distributed Quaternary Decision Tree
//!
//! A tree of at most four children per node laid over the cluster mesh.
//! Leaves mirror one cluster each; internal nodes aggregate their subtree:
//! free memory per buddy order (`M`), live threads (`T`) and CPU usage
//! (`U`). Placement of threads and memory walks the tree from the
//! requester's leaf, up until a subtree admits the request, then down to
//! the best leaf of that subtree.
//!
//! ## Consistency model
//!
//! Indicators are atomics read without locks. `M` and `U` are refreshed
//! periodically and may lag; `T` is exact, since every placement,
//! arrival and departure propagates its +1/-1 to the ancestors.
//!
//! ## Layout
//!
//! ```text
//!                     root (level 2)
//!          /        /        \        \
//!       L1 sq     L1 sq     L1 sq     L1 sq
//!      / | | \    ...
//!   leaves = clusters (level 0)
//! ```

pub mod build;
pub mod error;
pub mod indicators;
pub mod node;
pub mod placement;
pub mod update;

pub use error::{DqdtError, DqdtResult};
pub use indicators::{IndicatorSnapshot, Indicators};
pub use node::{DqdtNode, NodeId};
pub use placement::{Constraints, Placement, PlacementKind, PlacementRequest, Strategy};

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::cluster::{ClusterId, ClusterRegistry, CpuDescriptor, GlobalCpuId};
use crate::config::KernelConfig;
use crate::memory::PageAllocator;

/// Placement and update counters
#[derive(Debug, Default)]
pub(crate) struct DqdtStats {
    pub(crate) placements: AtomicU64,
    pub(crate) fallbacks: AtomicU64,
    pub(crate) commit_conflicts: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) leaf_updates: AtomicU64,
    pub(crate) full_updates: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DqdtStatsSnapshot {
    pub placements: u64,
    /// Placements that needed a relaxed strategy
    pub fallbacks: u64,
    pub commit_conflicts: u64,
    pub failures: u64,
    pub leaf_updates: u64,
    pub full_updates: u64,
}

/// Copy of one node for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub level: u8,
    pub cluster: Option<ClusterId>,
    pub cores: u32,
    pub indicators: IndicatorSnapshot,
}

pub struct Dqdt {
    registry: Arc<ClusterRegistry>,
    ppm: Arc<dyn PageAllocator>,
    config: KernelConfig,
    nodes: Vec<DqdtNode>,
    root: NodeId,
    depth: u8,
    stats: DqdtStats,
}

impl Dqdt {
    /// Build the tree over `registry` and attach every leaf to its cluster
    pub fn build(registry: Arc<ClusterRegistry>, ppm: Arc<dyn PageAllocator>, config: KernelConfig) -> Self {
        let (nodes, root, depth) = build::build_tree(&registry);

        for cluster in registry.clusters() {
            cluster.attach_dqdt_leaf(NodeId(cluster.id().0));
        }

        log::info!(
            "dqdt: {} nodes, depth {}, root {} homed on {}",
            nodes.len(),
            depth,
            root,
            nodes[root.index()].home
        );

        Self {
            registry,
            ppm,
            config,
            nodes,
            root,
            depth,
            stats: DqdtStats::default(),
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &DqdtNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[DqdtNode] {
        &self.nodes
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Level of the root (0 for a single cluster)
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Leaf representing `cluster`
    pub fn leaf(&self, cluster: ClusterId) -> DqdtResult<NodeId> {
        if cluster.index() < self.registry.cluster_count() {
            Ok(NodeId(cluster.0))
        } else {
            Err(DqdtError::InvalidCluster { cluster: cluster.0 })
        }
    }

    pub fn snapshot(&self, id: NodeId) -> NodeSnapshot {
        let node = self.node(id);
        NodeSnapshot {
            id,
            level: node.level,
            cluster: node.cluster,
            cores: node.cores,
            indicators: node.indicators.snapshot(),
        }
    }

    pub fn stats(&self) -> DqdtStatsSnapshot {
        let s = &self.stats;
        DqdtStatsSnapshot {
            placements: s.placements.load(Ordering::Relaxed),
            fallbacks: s.fallbacks.load(Ordering::Relaxed),
            commit_conflicts: s.commit_conflicts.load(Ordering::Relaxed),
            failures: s.failures.load(Ordering::Relaxed),
            leaf_updates: s.leaf_updates.load(Ordering::Relaxed),
            full_updates: s.full_updates.load(Ordering::Relaxed),
        }
    }

    fn cpu_of(&self, gid: GlobalCpuId) -> DqdtResult<(NodeId, &CpuDescriptor)> {
        let leaf = self.leaf(gid.cluster())?;
        let cpu = self
            .registry
            .cpu(gid)
            .ok_or(DqdtError::InvalidCluster { cluster: gid.cluster().0 })?;
        Ok((leaf, cpu))
    }

    /// A thread started living on `gid` without going through `place`
    pub fn account_arrival(&self, gid: GlobalCpuId) -> DqdtResult<()> {
        let (leaf, cpu) = self.cpu_of(gid)?;
        let prev = self.node(leaf).indicators.threads_atomic().fetch_add(1, Ordering::AcqRel);
        self.propagate_arrival(leaf, prev);
        cpu.thread_added();
        Ok(())
    }

    /// A thread stopped living on `gid` (exit, or migrated away)
    pub fn account_departure(&self, gid: GlobalCpuId) -> DqdtResult<()> {
        let (leaf, cpu) = self.cpu_of(gid)?;
        let node = self.node(leaf);
        let prev = node.indicators.threads_atomic().fetch_sub(1, Ordering::AcqRel);
        kernel_assert!(prev > 0, "thread count of {} went negative", leaf);

        let idle_delta = if prev <= node.cores { 1 } else { 0 };
        node.indicators.adjust_idle(idle_delta);
        let mut next = node.parent;
        while let Some(id) = next {
            let n = self.node(id);
            let _ = n
                .indicators
                .threads_atomic()
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| Some(t.saturating_sub(1)));
            n.indicators.adjust_idle(idle_delta);
            next = n.parent;
        }
        cpu.thread_removed();
        Ok(())
    }

    /// Carry a leaf increment (leaf count was `prev`) up to the root
    pub(crate) fn propagate_arrival(&self, leaf: NodeId, prev: u32) {
        let node = self.node(leaf);
        let idle_delta = if prev < node.cores { -1 } else { 0 };
        node.indicators.adjust_idle(idle_delta);
        let mut next = node.parent;
        while let Some(id) = next {
            let n = self.node(id);
            n.indicators.threads_atomic().fetch_add(1, Ordering::AcqRel);
            n.indicators.adjust_idle(idle_delta);
            next = n.parent;
        }
    }

    /// Log the whole tree, root first
    pub fn dump(&self) {
        self.dump_node(self.root, 0);
    }

    fn dump_node(&self, id: NodeId, depth: usize) {
        let snap = self.snapshot(id);
        let ind = &snap.indicators;
        log::debug!(
            "{:indent$}{} L{} cores={} T={} idle={} U={}% M={}",
            "",
            id,
            snap.level,
            snap.cores,
            ind.threads,
            ind.idle_cores,
            ind.usage,
            ind.free.total_pages(),
            indent = depth * 2
        );
        for child in self.node(id).children() {
            self.dump_node(child, depth + 1);
        }
    }
}
