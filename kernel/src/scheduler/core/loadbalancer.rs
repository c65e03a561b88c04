//! Load Balancer - victim selection for thread export
//!
//! Runs inside the owner CPU's clock tick, once per balancing period. The
//! balancer never moves a thread itself: it marks a victim, and the
//! victim leaves at its next user/kernel boundary.
//!
//! Eligibility (all three must hold):
//! - local usage above the high water mark
//! - more than one runnable user thread
//! - usage of the DQDT parent of the local cluster below the low water mark
//!
//! Victim: highest `boosted_prio` among migratable runnable threads, first
//! in queue order on ties. Every pass halves every boosted priority.

use crate::cluster::{ClusterId, GlobalCpuId};
use crate::config::KernelConfig;
use crate::scheduler::thread::{Thread, ThreadId};

/// Load information the balancer reads from the decision tree
pub trait LoadOracle {
    /// Usage (0-100) of the parent of `cluster`'s leaf, `None` at the root
    fn parent_usage(&self, cluster: ClusterId) -> Option<u8>;

    /// Pick (and reserve) a destination for a thread leaving `from`
    fn migration_target(&self, from: GlobalCpuId) -> Option<GlobalCpuId>;
}

/// Oracle that never allows a migration
pub struct NoBalancing;

impl LoadOracle for NoBalancing {
    fn parent_usage(&self, _cluster: ClusterId) -> Option<u8> {
        None
    }

    fn migration_target(&self, _from: GlobalCpuId) -> Option<GlobalCpuId> {
        None
    }
}

/// A thread marked for export by a balancing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export {
    pub thread: ThreadId,
    pub target: GlobalCpuId,
}

pub fn is_eligible(usage: u8, runnable_users: usize, parent_usage: Option<u8>, config: &KernelConfig) -> bool {
    usage > config.usage_high_water
        && runnable_users > 1
        && parent_usage.map_or(false, |u| u < config.usage_low_water)
}

/// Highest boosted priority among migratable candidates
pub fn select_victim<'a>(candidates: impl Iterator<Item = &'a Thread>) -> Option<ThreadId> {
    let mut best: Option<&Thread> = None;
    for thread in candidates.filter(|t| t.flags().is_migratable()) {
        if best.map_or(true, |b| thread.boosted_prio() > b.boosted_prio()) {
            best = Some(thread);
        }
    }
    best.map(|t| t.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::thread::ThreadFlags;
    use alloc::vec;

    #[test]
    fn test_eligibility() {
        let config = KernelConfig::default();
        assert!(is_eligible(90, 2, Some(10), &config));
        assert!(!is_eligible(80, 2, Some(10), &config));
        assert!(!is_eligible(90, 1, Some(10), &config));
        assert!(!is_eligible(90, 2, Some(50), &config));
        assert!(!is_eligible(90, 2, None, &config));
    }

    #[test]
    fn test_highest_boost_wins_first_on_tie() {
        let cpu = GlobalCpuId(0);
        let mut a = Thread::user(cpu);
        let mut b = Thread::user(cpu);
        let mut c = Thread::user(cpu);
        let mut pinned = Thread::user(cpu).with_flags(ThreadFlags::empty());
        a.boosted_prio = 3;
        b.boosted_prio = 7;
        c.boosted_prio = 7;
        pinned.boosted_prio = 50;

        let threads = vec![a, b.clone(), c, pinned];
        assert_eq!(select_victim(threads.iter()), Some(b.id()));

        b.flags |= ThreadFlags::EXPORTED;
        assert_eq!(select_victim(core::iter::once(&b)), None);
    }
}
