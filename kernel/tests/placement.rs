//! DQDT placement and aggregation properties

use std::sync::Arc;

use proptest::prelude::*;

use almos_kernel::cluster::{ClusterId, ClusterRegistry, CpuId, GlobalCpuId, Topology};
use almos_kernel::dqdt::{Dqdt, PlacementRequest, Strategy as PlacementStrategy};
use almos_kernel::memory::{BuddyAllocator, PageAllocator};
use almos_kernel::KernelConfig;

fn tree(x: u8, y: u8, cpus: u8) -> (Arc<ClusterRegistry>, Arc<BuddyAllocator>, Dqdt) {
    let registry = Arc::new(ClusterRegistry::from_topology(Topology::mesh(x, y, cpus)).unwrap());
    let ppm = Arc::new(BuddyAllocator::new(registry.cluster_count(), 256));
    let dqdt = Dqdt::build(registry.clone(), ppm.clone(), KernelConfig::default());
    (registry, ppm, dqdt)
}

fn gid(cluster: usize, lid: usize) -> GlobalCpuId {
    GlobalCpuId::new(ClusterId(cluster as u16), CpuId(lid as u8))
}

fn leaf_threads(dqdt: &Dqdt, cluster: usize) -> u32 {
    let leaf = dqdt.leaf(ClusterId(cluster as u16)).unwrap();
    dqdt.snapshot(leaf).indicators.threads
}

#[test]
fn busy_cluster_spills_to_its_neighbour() {
    // 4 clusters of 4 CPUs, cluster 0 already runs 4 threads
    let (_registry, _ppm, dqdt) = tree(2, 2, 4);
    for lid in 0..4 {
        dqdt.account_arrival(gid(0, lid)).unwrap();
    }
    dqdt.update();

    let placement = dqdt.place(&PlacementRequest::thread(ClusterId(0))).unwrap();
    assert_eq!(placement.cluster, ClusterId(1));
    assert_eq!(placement.cpu, gid(1, 0));
    assert_eq!(placement.strategy, PlacementStrategy::Ltcn);
    assert_eq!(leaf_threads(&dqdt, 1), 1);
    assert_eq!(dqdt.snapshot(dqdt.root()).indicators.threads, 5);
}

#[test]
fn memory_requests_avoid_exhausted_clusters() {
    let (_registry, ppm, dqdt) = tree(2, 2, 1);
    // Keep cluster 2 with single pages only
    let mut held = Vec::new();
    while let Some(page) = ppm.alloc_pages(ClusterId(2), 0) {
        held.push(page);
    }
    for page in held.drain(..).step_by(2) {
        ppm.free_pages(page);
    }
    dqdt.update();

    let placement = dqdt.place(&PlacementRequest::memory(ClusterId(2), 3)).unwrap();
    assert_ne!(placement.cluster, ClusterId(2));
    // An order-0 request is fine locally
    let placement = dqdt.place(&PlacementRequest::memory(ClusterId(2), 0)).unwrap();
    assert_eq!(placement.cluster, ClusterId(2));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whenever some cluster has fewer threads than cores, the strict
    /// strategy finds it and never overfills the chosen leaf
    #[test]
    fn ltcn_never_overfills(
        loads in prop::collection::vec(0usize..7, 16),
        origin in 0usize..16,
    ) {
        let (_registry, _ppm, dqdt) = tree(4, 4, 4);
        for (cluster, &load) in loads.iter().enumerate() {
            for i in 0..load {
                dqdt.account_arrival(gid(cluster, i % 4)).unwrap();
            }
        }
        dqdt.update();

        let room = loads.iter().any(|&l| l < 4);
        let result = dqdt.place(&PlacementRequest::thread(ClusterId(origin as u16)));
        if room {
            let placement = result.unwrap();
            prop_assert_eq!(placement.strategy, PlacementStrategy::Ltcn);
            let cluster = placement.cluster.index();
            prop_assert!(loads[cluster] < 4);
            prop_assert_eq!(leaf_threads(&dqdt, cluster) as usize, loads[cluster] + 1);
        } else if let Ok(placement) = result {
            prop_assert_ne!(placement.strategy, PlacementStrategy::Ltcn);
        }
    }

    /// After a full update every internal node sums its children's
    /// thread counts and keeps usage within 0-100
    #[test]
    fn aggregates_match_children(
        loads in prop::collection::vec(0usize..9, 12),
        usages in prop::collection::vec(0u8..=100, 12 * 2),
        allocs in prop::collection::vec((0usize..12, 0usize..6), 0..20),
    ) {
        let (registry, ppm, dqdt) = tree(3, 4, 2);
        for (cluster, &load) in loads.iter().enumerate() {
            for i in 0..load {
                dqdt.account_arrival(gid(cluster, i % 2)).unwrap();
            }
        }
        for (i, cpu) in registry.cpus().enumerate() {
            cpu.set_usage(usages[i], usages[i]);
        }
        for &(cluster, order) in &allocs {
            let _ = ppm.alloc_pages(ClusterId(cluster as u16), order);
        }
        dqdt.update();

        for node in dqdt.nodes().iter().filter(|n| !n.is_leaf()) {
            let snap = dqdt.snapshot(node.id());
            let children: Vec<_> = node.children().map(|c| dqdt.snapshot(c)).collect();
            let threads: u32 = children.iter().map(|c| c.indicators.threads).sum();
            let pages: usize = children.iter().map(|c| c.indicators.free.total_pages()).sum();
            let idle: u32 = children.iter().map(|c| c.indicators.idle_cores).sum();
            prop_assert_eq!(snap.indicators.threads, threads);
            prop_assert_eq!(snap.indicators.free.total_pages(), pages);
            prop_assert_eq!(snap.indicators.idle_cores, idle);
            prop_assert!(snap.indicators.usage <= 100);
        }
        let root = dqdt.snapshot(dqdt.root());
        prop_assert_eq!(root.indicators.threads as usize, loads.iter().sum::<usize>());
    }
}
