//! Sequence counters - cache-line padded positions for MPMC rings
//!
//! Producer and consumer positions live on separate cache lines so that
//! pushes from remote clusters do not bounce the line the draining CPU is
//! reading.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Cache line size for padding
const CACHE_LINE_SIZE: usize = 64;

/// Atomic counter alone on its cache line
#[repr(C, align(64))]
pub struct CacheLineCounter {
    value: AtomicUsize,
    _pad: [u8; CACHE_LINE_SIZE - core::mem::size_of::<AtomicUsize>()],
}

impl CacheLineCounter {
    pub const fn new(initial: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial),
            _pad: [0u8; CACHE_LINE_SIZE - core::mem::size_of::<AtomicUsize>()],
        }
    }

    #[inline(always)]
    pub fn load(&self, order: Ordering) -> usize {
        self.value.load(order)
    }

    #[inline(always)]
    pub fn compare_exchange_weak(
        &self,
        current: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> Result<usize, usize> {
        self.value.compare_exchange_weak(current, new, success, failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_layout() {
        static_assertions::const_assert_eq!(core::mem::size_of::<CacheLineCounter>(), 64);
        static_assertions::const_assert_eq!(core::mem::align_of::<CacheLineCounter>(), 64);
        let c = CacheLineCounter::new(3);
        assert_eq!(c.load(Ordering::Relaxed), 3);
        while c.compare_exchange_weak(3, 4, Ordering::AcqRel, Ordering::Relaxed).is_err() {}
        assert_eq!(c.load(Ordering::Relaxed), 4);
    }
}
