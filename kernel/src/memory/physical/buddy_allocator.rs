//! Buddy Allocator - per-cluster physical page accounting
//!
//! Each cluster owns a contiguous range of page frame numbers managed by a
//! classic buddy system:
//! - Order 0 = 1 page, order `PPM_MAX_ORDER - 1` = largest block
//! - Allocation splits the smallest sufficient block
//! - Free coalesces with the buddy while it is free
//!
//! Free lists hold frame numbers, not memory, so the allocator can run on
//! any host and its histograms feed the DQDT memory indicators directly.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::cluster::ClusterId;
use crate::config::PPM_MAX_ORDER;
use crate::memory::{FreeHistogram, PageAllocator};
use crate::sync::IrqSpinLock;

/// A block of `2^order` pages starting at frame `pfn` of `cluster`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFrame {
    pub cluster: ClusterId,
    pub pfn: usize,
    pub order: u8,
}

/// Free lists of one cluster, one ordered set of block starts per order
struct ClusterZone {
    free: [BTreeSet<usize>; PPM_MAX_ORDER],
    pages: usize,
}

impl ClusterZone {
    fn new(pages: usize) -> Self {
        let mut zone = Self {
            free: core::array::from_fn(|_| BTreeSet::new()),
            pages,
        };

        // Carve [0, pages) into the largest naturally aligned blocks
        let mut pfn = 0;
        while pfn < pages {
            let mut order = PPM_MAX_ORDER - 1;
            while order > 0 && (pfn % (1 << order) != 0 || pfn + (1 << order) > pages) {
                order -= 1;
            }
            zone.free[order].insert(pfn);
            pfn += 1 << order;
        }
        zone
    }

    fn alloc(&mut self, order: usize) -> Option<usize> {
        let found = (order..PPM_MAX_ORDER).find(|&o| !self.free[o].is_empty())?;
        let pfn = *self.free[found].iter().next()?;
        self.free[found].remove(&pfn);

        // Split down, returning upper halves to the free lists
        let mut current = found;
        while current > order {
            current -= 1;
            self.free[current].insert(pfn + (1 << current));
        }
        Some(pfn)
    }

    fn free(&mut self, mut pfn: usize, mut order: usize) {
        while order + 1 < PPM_MAX_ORDER {
            let buddy = pfn ^ (1 << order);
            if buddy + (1 << order) > self.pages || !self.free[order].remove(&buddy) {
                break;
            }
            pfn = pfn.min(buddy);
            order += 1;
        }
        self.free[order].insert(pfn);
    }

    fn histogram(&self) -> FreeHistogram {
        let mut h = FreeHistogram::empty();
        for (order, list) in self.free.iter().enumerate() {
            h.blocks[order] = list.len();
        }
        h
    }
}

/// Buddy allocator covering every cluster of the machine
pub struct BuddyAllocator {
    zones: Vec<IrqSpinLock<ClusterZone>>,
}

impl BuddyAllocator {
    /// `pages_per_cluster` frames in each of `clusters` clusters
    pub fn new(clusters: usize, pages_per_cluster: usize) -> Self {
        Self {
            zones: (0..clusters)
                .map(|_| IrqSpinLock::new(ClusterZone::new(pages_per_cluster)))
                .collect(),
        }
    }

    /// Explicit frame count per cluster
    pub fn with_pages(pages: &[usize]) -> Self {
        Self {
            zones: pages.iter().map(|&p| IrqSpinLock::new(ClusterZone::new(p))).collect(),
        }
    }
}

impl PageAllocator for BuddyAllocator {
    fn alloc_pages(&self, cluster: ClusterId, order: usize) -> Option<PageFrame> {
        if order >= PPM_MAX_ORDER {
            return None;
        }
        let pfn = self.zones.get(cluster.index())?.lock().alloc(order)?;
        log::trace!("ppm: {} alloc order {} -> pfn {:#x}", cluster, order, pfn);
        Some(PageFrame {
            cluster,
            pfn,
            order: order as u8,
        })
    }

    fn free_pages(&self, page: PageFrame) {
        if let Some(zone) = self.zones.get(page.cluster.index()) {
            zone.lock().free(page.pfn, page.order as usize);
        }
    }

    fn free_pages_by_order(&self, cluster: ClusterId) -> FreeHistogram {
        self.zones
            .get(cluster.index())
            .map(|z| z.lock().histogram())
            .unwrap_or_else(FreeHistogram::empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buddy_alloc_free() {
        let ppm = BuddyAllocator::new(1, 1024);
        let c0 = ClusterId(0);
        assert_eq!(ppm.free_pages_by_order(c0).blocks[PPM_MAX_ORDER - 1], 1);

        let a = ppm.alloc_pages(c0, 0).unwrap();
        let h = ppm.free_pages_by_order(c0);
        assert_eq!(h.total_pages(), 1023);
        // One block of every order below the top was split off
        assert!((0..PPM_MAX_ORDER - 1).all(|o| h.blocks[o] == 1));

        ppm.free_pages(a);
        let h = ppm.free_pages_by_order(c0);
        assert_eq!(h.total_pages(), 1024);
        assert_eq!(h.blocks[PPM_MAX_ORDER - 1], 1);
    }

    #[test]
    fn test_unaligned_zone_and_exhaustion() {
        let ppm = BuddyAllocator::with_pages(&[5]);
        let c0 = ClusterId(0);
        let h = ppm.free_pages_by_order(c0);
        assert_eq!(h.blocks[2], 1);
        assert_eq!(h.blocks[0], 1);

        assert!(ppm.alloc_pages(c0, 3).is_none());
        assert!(ppm.alloc_pages(c0, 2).is_some());
        assert!(ppm.alloc_pages(c0, 0).is_some());
        assert!(ppm.alloc_pages(c0, 0).is_none());
        assert!(ppm.alloc_pages(ClusterId(7), 0).is_none());
    }
}
