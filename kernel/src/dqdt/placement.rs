//! Placement search
//!
//! ## Up-traversal
//! Start at the requester's leaf; while the node fails the strategy's
//! predicate, climb to the parent. Failing at the root ends the strategy.
//!
//! ## Down-traversal
//! From the first admitting node, order the children by the strategy key,
//! then by mesh distance to the requester, then by index; the subtree we
//! climbed out of and absent children go last and are never entered.
//! Enter the first child that admits, down to a leaf.
//!
//! ## Commit
//! At the leaf, pick the least loaded CPU and bump the live thread count.
//! If the value observed by the increment no longer satisfies the
//! predicate, undo it; the search is retried a bounded number of times.
//!
//! ## Fallback chain
//! Thread placements try LTCN (fewer threads than cores), then the two
//! configured load thresholds. Memory placements need a free block of the
//! requested order and a minimum free page count.

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::Ordering;
use serde::{Deserialize, Serialize};

use super::error::{DqdtError, DqdtResult};
use super::node::{DqdtNode, NodeId};
use super::Dqdt;
use crate::cluster::{ClusterId, GlobalCpuId};
use crate::memory::FreeHistogram;
use crate::scheduler::LoadOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementKind {
    ThreadCreate,
    TaskFork,
    ThreadMigrate,
    MemoryAlloc,
}

impl PlacementKind {
    #[inline]
    pub fn places_thread(self) -> bool {
        !matches!(self, Self::MemoryAlloc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Buddy order of a memory request
    pub order: usize,
    /// Free pages a cluster must hold (memory requests; 0 = configured minimum)
    pub min_free_pages: usize,
    pub exclude_cpu: Option<GlobalCpuId>,
    pub exclude_cluster: Option<ClusterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub kind: PlacementKind,
    /// Cluster asking; the search starts at its leaf
    pub origin: ClusterId,
    pub constraints: Constraints,
}

impl PlacementRequest {
    pub fn new(kind: PlacementKind, origin: ClusterId) -> Self {
        Self {
            kind,
            origin,
            constraints: Constraints::default(),
        }
    }

    pub fn thread(origin: ClusterId) -> Self {
        Self::new(PlacementKind::ThreadCreate, origin)
    }

    pub fn memory(origin: ClusterId, order: usize) -> Self {
        let mut req = Self::new(PlacementKind::MemoryAlloc, origin);
        req.constraints.order = order;
        req
    }

    pub fn excluding_cluster(mut self, cluster: ClusterId) -> Self {
        self.constraints.exclude_cluster = Some(cluster);
        self
    }

    pub fn excluding_cpu(mut self, cpu: GlobalCpuId) -> Self {
        self.constraints.exclude_cpu = Some(cpu);
        self
    }

    pub fn with_min_free_pages(mut self, pages: usize) -> Self {
        self.constraints.min_free_pages = pages;
        self
    }
}

/// Selection predicate of one step of the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Strictly fewer live threads than cores
    Ltcn,
    /// Live threads at most `percent`% of cores (counting the newcomer at leaves)
    LoadBelow(u16),
    /// Free block of `order` or larger and at least `min_pages` free pages
    Memory { order: usize, min_pages: usize },
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ltcn => write!(f, "ltcn"),
            Self::LoadBelow(percent) => write!(f, "load<={}%", percent),
            Self::Memory { order, min_pages } => write!(f, "mem(order {}, {} pages)", order, min_pages),
        }
    }
}

impl Strategy {
    fn load_fits(threads: u32, cores: u32, percent: u16) -> bool {
        threads as u64 * 100 <= percent as u64 * cores as u64
    }

    fn memory_fits(free: &FreeHistogram, order: usize, min_pages: usize) -> bool {
        free.has_block(order) && free.total_pages() >= min_pages
    }

    /// Node-level predicate (aggregates for internal nodes)
    fn admits(&self, node: &DqdtNode) -> bool {
        let ind = &node.indicators;
        match *self {
            Self::Ltcn if node.is_leaf() => ind.threads() < node.cores,
            Self::Ltcn => ind.idle_cores() > 0,
            Self::LoadBelow(percent) if node.is_leaf() => Self::load_fits(ind.threads() + 1, node.cores, percent),
            Self::LoadBelow(percent) => Self::load_fits(ind.threads(), node.cores, percent),
            Self::Memory { order, min_pages } => Self::memory_fits(&ind.free(), order, min_pages),
        }
    }

    /// Does a leaf whose count was `prev` before our increment still fit?
    fn admits_commit(&self, prev: u32, cores: u32) -> bool {
        match *self {
            Self::Ltcn => prev < cores,
            Self::LoadBelow(percent) => Self::load_fits(prev + 1, cores, percent),
            Self::Memory { .. } => true,
        }
    }

    /// Down-traversal ordering key, lower is better
    fn key(&self, node: &DqdtNode) -> u64 {
        let ind = &node.indicators;
        match *self {
            Self::Ltcn => ind.threads() as u64,
            Self::LoadBelow(_) => ind.threads() as u64 * 100 / node.cores.max(1) as u64,
            Self::Memory { .. } => u64::MAX - ind.free().total_pages() as u64,
        }
    }
}

/// Where a request landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub cluster: ClusterId,
    pub cpu: GlobalCpuId,
    pub strategy: Strategy,
}

enum Outcome {
    Placed(Placement),
    /// Predicate failed all the way up
    Exhausted,
    /// Some leaf commit was undone; worth another try
    Conflict,
}

impl Dqdt {
    fn strategies(&self, req: &PlacementRequest) -> Vec<Strategy> {
        if req.kind.places_thread() {
            let [first, second] = self.config.dqdt_usage_thresholds;
            alloc::vec![Strategy::Ltcn, Strategy::LoadBelow(first), Strategy::LoadBelow(second)]
        } else {
            let min_pages = match req.constraints.min_free_pages {
                0 => self.config.mem_min_free_pages,
                pages => pages,
            };
            alloc::vec![Strategy::Memory {
                order: req.constraints.order,
                min_pages,
            }]
        }
    }

    fn admits(&self, node: &DqdtNode, req: &PlacementRequest, strategy: &Strategy) -> bool {
        if node.is_leaf() && node.cluster == req.constraints.exclude_cluster {
            return false;
        }
        strategy.admits(node)
    }

    /// Find a target for `req` and commit the matching bookkeeping
    pub fn place(&self, req: &PlacementRequest) -> DqdtResult<Placement> {
        self.leaf(req.origin)?;

        for (rank, strategy) in self.strategies(req).iter().enumerate() {
            match self.place_with(req, strategy) {
                Ok(placement) => {
                    self.stats.placements.fetch_add(1, Ordering::Relaxed);
                    if rank > 0 {
                        self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                    }
                    log::debug!(
                        "dqdt: {:?} from {} -> {} via {}",
                        req.kind,
                        req.origin,
                        placement.cpu,
                        strategy
                    );
                    return Ok(placement);
                }
                Err(DqdtError::RetryExhausted { attempts }) => {
                    log::warn!("dqdt: {} gave up after {} conflicting commits", strategy, attempts);
                }
                Err(_) => {}
            }
        }

        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        log::debug!("dqdt: no placement for {:?} from {}", req.kind, req.origin);
        Err(DqdtError::NoPlacement)
    }

    /// One step of the fallback chain, with commit retries
    fn place_with(&self, req: &PlacementRequest, strategy: &Strategy) -> DqdtResult<Placement> {
        let attempts = self.config.placement_retries.max(1);
        for _ in 0..attempts {
            match self.search(req, strategy) {
                Outcome::Placed(placement) => return Ok(placement),
                Outcome::Exhausted => return Err(DqdtError::NoPlacement),
                Outcome::Conflict => {
                    self.stats.commit_conflicts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Err(DqdtError::RetryExhausted { attempts })
    }

    fn search(&self, req: &PlacementRequest, strategy: &Strategy) -> Outcome {
        let mut conflict = false;
        let mut came_from: Option<NodeId> = None;
        let mut current = match self.leaf(req.origin) {
            Ok(leaf) => leaf,
            Err(_) => return Outcome::Exhausted,
        };

        loop {
            let node = self.node(current);
            if self.admits(node, req, strategy) {
                if let Some(placement) = self.descend(current, came_from, req, strategy, &mut conflict) {
                    return Outcome::Placed(placement);
                }
            }
            match node.parent {
                Some(parent) => {
                    came_from = Some(current);
                    current = parent;
                }
                None if conflict => return Outcome::Conflict,
                None => return Outcome::Exhausted,
            }
        }
    }

    fn descend(
        &self,
        id: NodeId,
        skip: Option<NodeId>,
        req: &PlacementRequest,
        strategy: &Strategy,
        conflict: &mut bool,
    ) -> Option<Placement> {
        let node = self.node(id);
        if node.is_leaf() {
            return self.commit(node, req, strategy, conflict);
        }

        let topology = self.registry.topology();
        let mut order: Vec<(bool, u64, u32, u8, NodeId)> = node
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|c| (i, c)))
            .map(|(i, c)| {
                let child = self.node(c);
                let tried = Some(c) == skip;
                let key = if tried { u64::MAX } else { strategy.key(child) };
                let distance = topology.distance_to_region(req.origin, &child.region);
                (tried, key, distance, i as u8, c)
            })
            .collect();
        order.sort_unstable();

        for &(tried, _, _, _, child) in &order {
            if tried {
                break;
            }
            if !self.admits(self.node(child), req, strategy) {
                continue;
            }
            if let Some(placement) = self.descend(child, None, req, strategy, conflict) {
                return Some(placement);
            }
        }
        None
    }

    fn commit(&self, leaf: &DqdtNode, req: &PlacementRequest, strategy: &Strategy, conflict: &mut bool) -> Option<Placement> {
        let cluster_id = leaf.cluster?;
        let cluster = self.registry.cluster(cluster_id)?;
        let cpu = cluster.least_loaded_cpu(req.constraints.exclude_cpu)?;

        if let Strategy::Memory { order, min_pages } = *strategy {
            let free = self.ppm.free_pages_by_order(cluster_id);
            leaf.indicators.set_free(&free);
            if !Strategy::memory_fits(&free, order, min_pages) {
                *conflict = true;
                return None;
            }
        } else {
            let prev = leaf.indicators.threads_atomic().fetch_add(1, Ordering::AcqRel);
            if !strategy.admits_commit(prev, leaf.cores) {
                leaf.indicators.threads_atomic().fetch_sub(1, Ordering::AcqRel);
                *conflict = true;
                return None;
            }
            self.propagate_arrival(leaf.id, prev);
            cpu.thread_added();
        }

        Some(Placement {
            cluster: cluster_id,
            cpu: cpu.gid(),
            strategy: *strategy,
        })
    }
}

impl LoadOracle for Dqdt {
    fn parent_usage(&self, cluster: ClusterId) -> Option<u8> {
        let leaf = self.leaf(cluster).ok()?;
        let parent = self.node(leaf).parent?;
        Some(self.node(parent).indicators.usage())
    }

    fn migration_target(&self, from: GlobalCpuId) -> Option<GlobalCpuId> {
        let req = PlacementRequest::new(PlacementKind::ThreadMigrate, from.cluster())
            .excluding_cluster(from.cluster())
            .excluding_cpu(from);
        self.place(&req).ok().map(|p| p.cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterRegistry, CpuId, Topology};
    use crate::config::KernelConfig;
    use crate::memory::{BuddyAllocator, PageAllocator};
    use alloc::sync::Arc;

    fn tree(x: u8, y: u8, cpus: u8, config: KernelConfig) -> (Arc<BuddyAllocator>, Dqdt) {
        let registry = Arc::new(ClusterRegistry::from_topology(Topology::mesh(x, y, cpus)).unwrap());
        let ppm = Arc::new(BuddyAllocator::new(registry.cluster_count(), 64));
        let dqdt = Dqdt::build(registry, ppm.clone(), config);
        (ppm, dqdt)
    }

    fn fill(dqdt: &Dqdt, cluster: u16, threads: u8) {
        for i in 0..threads {
            let gid = GlobalCpuId::new(ClusterId(cluster), CpuId(i % 4));
            dqdt.account_arrival(gid).unwrap();
        }
    }

    #[test]
    fn test_local_leaf_first() {
        let (_ppm, dqdt) = tree(2, 2, 4, KernelConfig::default());
        let p = dqdt.place(&PlacementRequest::thread(ClusterId(3))).unwrap();
        assert_eq!(p.cluster, ClusterId(3));
        assert_eq!(p.strategy, Strategy::Ltcn);
        assert_eq!(dqdt.snapshot(dqdt.leaf(ClusterId(3)).unwrap()).indicators.threads, 1);
    }

    #[test]
    fn test_full_cluster_spills_to_nearest() {
        let (_ppm, dqdt) = tree(2, 2, 4, KernelConfig::default());
        fill(&dqdt, 0, 4);
        dqdt.update();
        let p = dqdt.place(&PlacementRequest::thread(ClusterId(0))).unwrap();
        assert_eq!(p.cluster, ClusterId(1));
    }

    #[test]
    fn test_fallback_chain() {
        let (_ppm, dqdt) = tree(1, 1, 2, KernelConfig::default());
        // LTCN while threads < cores, then 100% and 200% load
        let strategies: Vec<_> = (0..4)
            .map(|_| dqdt.place(&PlacementRequest::thread(ClusterId(0))).unwrap().strategy)
            .collect();
        assert_eq!(
            strategies,
            [Strategy::Ltcn, Strategy::Ltcn, Strategy::LoadBelow(200), Strategy::LoadBelow(200)]
        );
        assert_eq!(
            dqdt.place(&PlacementRequest::thread(ClusterId(0))),
            Err(DqdtError::NoPlacement)
        );
        assert_eq!(dqdt.stats().failures, 1);
    }

    #[test]
    fn test_custom_thresholds() {
        let config = KernelConfig::default().with_usage_thresholds([100, 150]);
        let (_ppm, dqdt) = tree(1, 1, 2, config);
        fill(&dqdt, 0, 2);
        let p = dqdt.place(&PlacementRequest::thread(ClusterId(0))).unwrap();
        assert_eq!(p.strategy, Strategy::LoadBelow(150));
        assert!(dqdt.place(&PlacementRequest::thread(ClusterId(0))).is_err());
    }

    #[test]
    fn test_memory_placement() {
        let (ppm, dqdt) = tree(1, 2, 1, KernelConfig::default());
        // Drain cluster 0 completely
        while ppm.alloc_pages(ClusterId(0), 0).is_some() {}
        dqdt.update();

        let p = dqdt.place(&PlacementRequest::memory(ClusterId(0), 2)).unwrap();
        assert_eq!(p.cluster, ClusterId(1));
        // Memory placement does not count as a thread
        assert_eq!(dqdt.snapshot(dqdt.root()).indicators.threads, 0);

        assert_eq!(
            dqdt.place(&PlacementRequest::memory(ClusterId(0), 7)),
            Err(DqdtError::NoPlacement)
        );
    }

    #[test]
    fn test_excluded_cluster_and_unknown_origin() {
        let (_ppm, dqdt) = tree(1, 2, 2, KernelConfig::default());
        let req = PlacementRequest::thread(ClusterId(0)).excluding_cluster(ClusterId(0));
        assert_eq!(dqdt.place(&req).unwrap().cluster, ClusterId(1));
        assert_eq!(
            dqdt.place(&PlacementRequest::thread(ClusterId(9))),
            Err(DqdtError::InvalidCluster { cluster: 9 })
        );
    }

    #[test]
    fn test_migration_target_leaves_the_cluster() {
        let (_ppm, dqdt) = tree(2, 2, 4, KernelConfig::default());
        dqdt.update();
        let from = GlobalCpuId::new(ClusterId(2), CpuId(0));
        let target = dqdt.migration_target(from).unwrap();
        assert_ne!(target.cluster(), ClusterId(2));
        assert_eq!(dqdt.parent_usage(ClusterId(2)), Some(0));
    }
}
