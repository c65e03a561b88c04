//! Boot-time construction of the tree
//!
//! The mesh is covered by nested squares: a level-`L` node covers a
//! `2^L x 2^L` block of clusters, and its children are the four
//! `2^(L-1)` quarter blocks. Child `(dx, dy)` of a node sits at index
//! `dx * 2 + dy`. Blocks falling outside the mesh are absent children.
//!
//! ```text
//! level 1:   [ (0,0) (0,1) ]   [ (0,2) (0,3) ]
//!            [ (1,0) (1,1) ]   [ (1,2) (1,3) ]
//! level 2:   one node above the four level-1 squares, and so on
//! ```

use alloc::vec::Vec;
use core::sync::atomic::AtomicU8;

use super::indicators::{ChildReport, Indicators};
use super::node::{DqdtNode, NodeId};
use crate::cluster::{ClusterId, ClusterRegistry, MeshRegion};
use crate::config::{DQDT_ARITY, DQDT_LEVELS_MAX};

fn blank(id: NodeId, level: u8, home: ClusterId, cluster: Option<ClusterId>, cores: u32, region: MeshRegion) -> DqdtNode {
    DqdtNode {
        id,
        level,
        index: 0,
        parent: None,
        children: [None; DQDT_ARITY],
        home,
        cluster,
        cores,
        region,
        indicators: Indicators::new(cores),
        reports: core::array::from_fn(|_| ChildReport::new()),
        reported: AtomicU8::new(0),
    }
}

/// Build the node arena; returns the nodes, the root and the tree depth
pub(crate) fn build_tree(registry: &ClusterRegistry) -> (Vec<DqdtNode>, NodeId, u8) {
    let mut nodes = Vec::new();
    // (x, y, node) of the current level, in creation order
    let mut current: Vec<(u8, u8, NodeId)> = Vec::with_capacity(registry.cluster_count());

    for cluster in registry.clusters() {
        let (x, y) = cluster.coords();
        let id = NodeId(nodes.len() as u16);
        nodes.push(blank(
            id,
            0,
            cluster.id(),
            Some(cluster.id()),
            cluster.cpu_count() as u32,
            cluster.region(),
        ));
        current.push((x, y, id));
    }

    let mut level = 0u8;
    while current.len() > 1 {
        level += 1;
        kernel_assert!((level as usize) < DQDT_LEVELS_MAX, "mesh too large for the decision tree");

        let mut next: Vec<(u8, u8, NodeId)> = Vec::new();
        for &(x, y, child) in &current {
            let (px, py) = (x >> 1, y >> 1);
            let index = ((x & 1) * 2 + (y & 1)) as usize;
            let (home, region, cores) = {
                let c = &nodes[child.index()];
                (c.home, c.region, c.cores)
            };

            let parent = match next.iter().find(|&&(nx, ny, _)| nx == px && ny == py) {
                Some(&(_, _, id)) => id,
                None => {
                    let id = NodeId(nodes.len() as u16);
                    nodes.push(blank(id, level, home, None, 0, region));
                    next.push((px, py, id));
                    id
                }
            };

            let c = &mut nodes[child.index()];
            c.parent = Some(parent);
            c.index = index as u8;

            let p = &mut nodes[parent.index()];
            p.children[index] = Some(child);
            p.cores += cores;
            p.region = p.region.union(&region);
        }
        current = next;
    }

    for node in nodes.iter().filter(|n| !n.is_leaf()) {
        node.indicators.set_idle_cores(node.cores);
    }

    let root = current.first().map(|&(_, _, id)| id).unwrap_or(NodeId(0));
    (nodes, root, level)
}
