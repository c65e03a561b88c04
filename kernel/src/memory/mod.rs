//! Memory management collaborator interface
//!
//! The physical page manager itself is outside the placement core; the core
//! only needs per-cluster free-page histograms (DQDT memory indicators) and
//! page allocation for RPC scratch space. `physical::BuddyAllocator` is the
//! per-cluster buddy accounting used at boot and in tests.

pub mod physical;

pub use physical::{BuddyAllocator, PageFrame};

use core::fmt;

use crate::cluster::ClusterId;
use crate::config::PPM_MAX_ORDER;

/// Size of a physical page (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Physical page manager, one instance serving every cluster
pub trait PageAllocator: Send + Sync {
    /// Allocate `2^order` contiguous pages from `cluster`'s memory
    fn alloc_pages(&self, cluster: ClusterId, order: usize) -> Option<PageFrame>;

    /// Return pages obtained from `alloc_pages`
    fn free_pages(&self, page: PageFrame);

    /// Free blocks per order in `cluster`
    fn free_pages_by_order(&self, cluster: ClusterId) -> FreeHistogram;
}

/// Free block count per buddy order
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeHistogram {
    pub blocks: [usize; PPM_MAX_ORDER],
}

impl FreeHistogram {
    pub const fn empty() -> Self {
        Self {
            blocks: [0; PPM_MAX_ORDER],
        }
    }

    /// Free pages, all orders included
    pub fn total_pages(&self) -> usize {
        self.blocks
            .iter()
            .enumerate()
            .map(|(order, &count)| count << order)
            .sum()
    }

    /// Is there a free block of `order` or larger?
    pub fn has_block(&self, order: usize) -> bool {
        self.blocks.iter().skip(order).any(|&count| count > 0)
    }

    /// Add `other` bucket by bucket
    pub fn merge(&mut self, other: &FreeHistogram) {
        for (mine, theirs) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            *mine += *theirs;
        }
    }
}

impl fmt::Debug for FreeHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({} pages)", self.blocks, self.total_pages())
    }
}
