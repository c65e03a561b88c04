//! Indicator maintenance
//!
//! Leaves are refreshed from their cluster's live state (page allocator
//! histogram, CPU usage). Each refreshed node pushes its values into its
//! parent's child slot; the reporter that completes the slot set of a
//! parent whose period has elapsed recomputes that parent and climbs on.
//!
//! Thread counts are special: they are kept exact by propagation at every
//! placement, arrival and departure, and aggregation only re-syncs them.

use core::sync::atomic::Ordering;

use super::error::DqdtResult;
use super::node::NodeId;
use super::Dqdt;
use crate::cluster::ClusterId;
use crate::memory::FreeHistogram;

impl Dqdt {
    /// Refresh the leaf of `cluster` from live state
    pub fn update_leaf(&self, cluster: ClusterId) -> DqdtResult<NodeId> {
        let id = self.leaf(cluster)?;
        let node = self.node(id);
        let usage = self.registry.cluster(cluster).map_or(0, |c| c.usage());

        node.indicators.set_free(&self.ppm.free_pages_by_order(cluster));
        node.indicators.set_usage(usage);
        let threads = node.indicators.threads();
        node.indicators.set_idle_cores(node.cores.saturating_sub(threads));
        Ok(id)
    }

    /// Push `child`'s values into its parent's slot.
    ///
    /// Returns the parent and whether every present child has now reported.
    fn report(&self, child: NodeId) -> Option<(NodeId, bool)> {
        let c = self.node(child);
        let parent = self.node(c.parent?);
        parent.reports[c.index as usize].store(&c.indicators.free(), c.indicators.usage());
        Some((parent.id, parent.mark_reported(c.index)))
    }

    /// Recompute an internal node from its children
    fn aggregate(&self, id: NodeId) {
        let node = self.node(id);
        let mut free = FreeHistogram::empty();
        let mut weighted: u64 = 0;
        let mut threads: u32 = 0;
        let mut idle: u32 = 0;

        for child in node.children() {
            let c = self.node(child);
            let slot = &node.reports[c.index as usize];
            free.merge(&slot.free());
            weighted += slot.usage() as u64 * c.cores as u64;
            threads += c.indicators.threads();
            idle += c.indicators.idle_cores();
        }

        node.indicators.set_free(&free);
        node.indicators.set_usage((weighted / node.cores.max(1) as u64) as u8);
        node.indicators.set_threads(threads);
        node.indicators.set_idle_cores(idle);
    }

    /// Periodic update driven by `cluster`'s manager in round `round`.
    ///
    /// The leaf is refreshed every round; a level-`L` ancestor is
    /// recomputed every `2^(L-1)` rounds once all its children reported
    /// in that round.
    /// Returns the number of ancestors recomputed.
    pub fn tick(&self, cluster: ClusterId, round: u64) -> DqdtResult<usize> {
        let mut child = self.update_leaf(cluster)?;
        let mut refreshed = 0;

        while let Some((parent, complete)) = self.report(child) {
            // A complete set is consumed even off-period, so the next
            // aggregation only sees reports from its own round
            if !complete || !self.node(parent).take_reports() {
                break;
            }
            let level = self.node(parent).level as u32;
            if round % (1u64 << (level - 1)) != 0 {
                break;
            }
            self.aggregate(parent);
            refreshed += 1;
            child = parent;
        }
        self.stats.leaf_updates.fetch_add(1, Ordering::Relaxed);
        Ok(refreshed)
    }

    /// Full bottom-up pass over the whole tree
    pub fn update(&self) {
        for cluster in self.registry.clusters() {
            let _ = self.update_leaf(cluster.id());
        }
        for level in 1..=self.depth {
            for node in self.nodes.iter().filter(|n| n.level == level) {
                for child in node.children() {
                    let c = self.node(child);
                    node.reports[c.index as usize].store(&c.indicators.free(), c.indicators.usage());
                }
                node.reported.store(0, Ordering::Release);
                self.aggregate(node.id);
            }
        }
        self.stats.full_updates.fetch_add(1, Ordering::Relaxed);
    }
}
