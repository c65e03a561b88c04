//! Shared-memory fabric
//!
//! `Fabric` for machines where every cluster sees one physical address
//! space: remote copies are plain copies and IPIs are latched in per-CPU
//! mailboxes the receiving CPU polls. It can also refuse a percentage of
//! remote FIFO pushes, which models transient contention on the FIFO
//! ticket and is how congestion is injected in tests.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::backoff::XorShift64;
use super::Fabric;
use crate::cluster::{ClusterId, GlobalCpuId};
use crate::config::CPU_NR_MAX;

pub struct SharedMemoryFabric {
    /// IPIs raised per CPU since boot
    ipis: Vec<AtomicU64>,
    /// Latched, not yet acknowledged IPI per CPU
    pending: Vec<AtomicBool>,
    /// Percentage of FIFO pushes refused (0 = never)
    refusal_percent: u8,
    rng: AtomicU64,
    refusals: AtomicU64,
    bytes_copied: AtomicU64,
    relax: Option<fn()>,
}

impl SharedMemoryFabric {
    pub fn new() -> Self {
        Self {
            ipis: (0..CPU_NR_MAX).map(|_| AtomicU64::new(0)).collect(),
            pending: (0..CPU_NR_MAX).map(|_| AtomicBool::new(false)).collect(),
            refusal_percent: 0,
            rng: AtomicU64::new(0x853c_49e6_748f_ea9b),
            refusals: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            relax: None,
        }
    }

    /// Refuse `percent`% of remote FIFO pushes, drawn from a xorshift
    /// sequence seeded with `seed`
    pub fn with_fifo_refusal(mut self, percent: u8, seed: u64) -> Self {
        self.refusal_percent = percent.min(100);
        self.rng = AtomicU64::new(seed | 1);
        self
    }

    /// Call `relax` instead of a bare spin hint inside spin loops
    pub fn with_relax(mut self, relax: fn()) -> Self {
        self.relax = Some(relax);
        self
    }

    /// Acknowledge a latched IPI; true if one was pending
    pub fn take_ipi(&self, cpu: GlobalCpuId) -> bool {
        self.pending
            .get(cpu.index())
            .map(|p| p.swap(false, Ordering::AcqRel))
            .unwrap_or(false)
    }

    /// IPIs raised towards `cpu` since boot
    pub fn ipi_count(&self, cpu: GlobalCpuId) -> u64 {
        self.ipis.get(cpu.index()).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn total_ipis(&self) -> u64 {
        self.ipis.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// FIFO pushes refused so far
    pub fn refusals(&self) -> u64 {
        self.refusals.load(Ordering::Relaxed)
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }
}

impl Default for SharedMemoryFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric for SharedMemoryFabric {
    fn send_ipi(&self, target: GlobalCpuId) {
        if let Some(count) = self.ipis.get(target.index()) {
            count.fetch_add(1, Ordering::Relaxed);
            self.pending[target.index()].store(true, Ordering::Release);
        }
    }

    fn remote_memcpy(&self, dst: &mut [u8], _dst_cluster: ClusterId, src: &[u8], _src_cluster: ClusterId) {
        dst.copy_from_slice(src);
        self.bytes_copied.fetch_add(src.len() as u64, Ordering::Relaxed);
    }

    fn fifo_congested(&self, _target: ClusterId) -> bool {
        if self.refusal_percent == 0 {
            return false;
        }
        let prev = match self.rng.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| Some(XorShift64::step(r))) {
            Ok(prev) | Err(prev) => prev,
        };
        let draw = XorShift64::step(prev) % 100;
        let refused = draw < self.refusal_percent as u64;
        if refused {
            self.refusals.fetch_add(1, Ordering::Relaxed);
        }
        refused
    }

    fn cpu_relax(&self) {
        match self.relax {
            Some(relax) => relax(),
            None => core::hint::spin_loop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipi_latch() {
        let fabric = SharedMemoryFabric::new();
        let cpu = GlobalCpuId(5);
        assert!(!fabric.take_ipi(cpu));
        fabric.send_ipi(cpu);
        fabric.send_ipi(cpu);
        assert_eq!(fabric.ipi_count(cpu), 2);
        assert!(fabric.take_ipi(cpu));
        assert!(!fabric.take_ipi(cpu));
    }

    #[test]
    fn test_refusal_rate_is_roughly_respected() {
        let fabric = SharedMemoryFabric::new().with_fifo_refusal(10, 42);
        let refused = (0..10_000).filter(|_| fabric.fifo_congested(ClusterId(0))).count();
        assert!(refused > 500 && refused < 1500, "refused {}", refused);
        assert_eq!(fabric.refusals(), refused as u64);
    }

    #[test]
    fn test_no_refusal_by_default() {
        let fabric = SharedMemoryFabric::new();
        assert!((0..1000).all(|_| !fabric.fifo_congested(ClusterId(1))));
    }
}
