//! Tree nodes
//!
//! Nodes live in one arena and point at each other by `NodeId`. Leaves
//! come first, in cluster order, so `NodeId(c)` is the leaf of cluster `c`.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use super::indicators::{ChildReport, Indicators};
use crate::cluster::{ClusterId, MeshRegion};
use crate::config::DQDT_ARITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u16);

impl NodeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug)]
pub struct DqdtNode {
    pub(crate) id: NodeId,
    /// 0 for leaves, growing towards the root
    pub(crate) level: u8,
    /// Position in the parent's child table
    pub(crate) index: u8,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; DQDT_ARITY],
    /// Cluster whose memory hosts the node
    pub(crate) home: ClusterId,
    /// Represented cluster (leaves only)
    pub(crate) cluster: Option<ClusterId>,
    /// Cores in the subtree
    pub(crate) cores: u32,
    /// Mesh rectangle covered by the subtree
    pub(crate) region: MeshRegion,
    pub(crate) indicators: Indicators,
    pub(crate) reports: [ChildReport; DQDT_ARITY],
    /// One bit per child that reported this period
    pub(crate) reported: AtomicU8,
}

impl DqdtNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }

    pub fn home(&self) -> ClusterId {
        self.home
    }

    pub fn cluster(&self) -> Option<ClusterId> {
        self.cluster
    }

    pub fn is_leaf(&self) -> bool {
        self.cluster.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn region(&self) -> MeshRegion {
        self.region
    }

    pub fn indicators(&self) -> &Indicators {
        &self.indicators
    }

    /// Mask with one bit per present child
    pub fn present_mask(&self) -> u8 {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Record the report of child `index`; true if it completed the set
    pub(crate) fn mark_reported(&self, index: u8) -> bool {
        let full = self.present_mask();
        let prev = self.reported.fetch_or(1 << index, Ordering::AcqRel);
        (prev | (1 << index)) & full == full
    }

    /// Consume a complete report set; only one caller wins
    pub(crate) fn take_reports(&self) -> bool {
        let full = self.present_mask();
        self.reported
            .compare_exchange(full, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
