//! Node indicators
//!
//! `M` free memory histogram, `T` live thread count, `U` usage percentage,
//! plus the number of cores not covered by a live thread in the subtree
//! (sum over leaves of `cores - T`, floored at 0 per leaf).

use core::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::config::PPM_MAX_ORDER;
use crate::memory::FreeHistogram;

#[derive(Debug)]
pub struct Indicators {
    free: [AtomicUsize; PPM_MAX_ORDER],
    threads: AtomicU32,
    usage: AtomicU8,
    idle_cores: AtomicU32,
}

/// Plain copy of a node's indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSnapshot {
    pub free: FreeHistogram,
    pub threads: u32,
    pub usage: u8,
    pub idle_cores: u32,
}

impl Indicators {
    pub fn new(idle_cores: u32) -> Self {
        Self {
            free: core::array::from_fn(|_| AtomicUsize::new(0)),
            threads: AtomicU32::new(0),
            usage: AtomicU8::new(0),
            idle_cores: AtomicU32::new(idle_cores),
        }
    }

    pub fn free(&self) -> FreeHistogram {
        let mut h = FreeHistogram::empty();
        for (dst, src) in h.blocks.iter_mut().zip(self.free.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        h
    }

    pub fn set_free(&self, h: &FreeHistogram) {
        for (dst, &src) in self.free.iter().zip(h.blocks.iter()) {
            dst.store(src, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn threads(&self) -> u32 {
        self.threads.load(Ordering::Acquire)
    }

    pub(crate) fn threads_atomic(&self) -> &AtomicU32 {
        &self.threads
    }

    pub fn set_threads(&self, threads: u32) {
        self.threads.store(threads, Ordering::Release);
    }

    #[inline]
    pub fn usage(&self) -> u8 {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn set_usage(&self, usage: u8) {
        self.usage.store(usage.min(100), Ordering::Relaxed);
    }

    #[inline]
    pub fn idle_cores(&self) -> u32 {
        self.idle_cores.load(Ordering::Acquire)
    }

    pub fn set_idle_cores(&self, idle: u32) {
        self.idle_cores.store(idle, Ordering::Release);
    }

    /// Apply a +1/-1 change of idle cores
    pub(crate) fn adjust_idle(&self, delta: i32) {
        match delta {
            d if d > 0 => {
                self.idle_cores.fetch_add(d as u32, Ordering::AcqRel);
            }
            d if d < 0 => {
                let _ = self
                    .idle_cores
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub((-d) as u32)));
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            free: self.free(),
            threads: self.threads(),
            usage: self.usage(),
            idle_cores: self.idle_cores(),
        }
    }
}

/// Values a child pushed into its parent's slot for the current period
#[derive(Debug)]
pub struct ChildReport {
    free: [AtomicUsize; PPM_MAX_ORDER],
    usage: AtomicU8,
}

impl ChildReport {
    pub fn new() -> Self {
        Self {
            free: core::array::from_fn(|_| AtomicUsize::new(0)),
            usage: AtomicU8::new(0),
        }
    }

    pub fn store(&self, free: &FreeHistogram, usage: u8) {
        for (dst, &src) in self.free.iter().zip(free.blocks.iter()) {
            dst.store(src, Ordering::Relaxed);
        }
        self.usage.store(usage, Ordering::Release);
    }

    pub fn free(&self) -> FreeHistogram {
        let mut h = FreeHistogram::empty();
        for (dst, src) in h.blocks.iter_mut().zip(self.free.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        h
    }

    pub fn usage(&self) -> u8 {
        self.usage.load(Ordering::Acquire)
    }
}

impl Default for ChildReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_never_underflows() {
        let ind = Indicators::new(1);
        ind.adjust_idle(-1);
        ind.adjust_idle(-1);
        assert_eq!(ind.idle_cores(), 0);
        ind.adjust_idle(1);
        assert_eq!(ind.idle_cores(), 1);
    }

    #[test]
    fn test_usage_is_clamped() {
        let ind = Indicators::new(0);
        ind.set_usage(250);
        assert_eq!(ind.usage(), 100);
    }
}
