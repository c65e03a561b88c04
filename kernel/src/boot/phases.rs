//! Boot Phases Management
//!
//! The boot sequence brings the core up in dependency order:
//! - REGISTRY: topology validated, cluster and CPU descriptors built
//! - DQDT: decision tree built over the registry, first full update
//! - RPC: listeners created, built-in endpoints registered
//! - SCHEDULERS: one scheduler per CPU, idle thread elected

use core::fmt;

/// Boot phase states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BootPhase {
    /// Nothing built yet
    PreBoot = 0,
    Registry = 1,
    Dqdt = 2,
    Rpc = 3,
    Schedulers = 4,
    /// Boot complete
    Complete = 5,
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreBoot => "PRE-BOOT",
            Self::Registry => "REGISTRY",
            Self::Dqdt => "DQDT",
            Self::Rpc => "RPC",
            Self::Schedulers => "SCHEDULERS",
            Self::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// Progress of one boot sequence
#[derive(Debug)]
pub struct PhaseTracker {
    current: BootPhase,
}

impl PhaseTracker {
    pub const fn new() -> Self {
        Self {
            current: BootPhase::PreBoot,
        }
    }

    pub fn current(&self) -> BootPhase {
        self.current
    }

    /// Advance to the next phase
    pub fn advance(&mut self, next: BootPhase) {
        kernel_assert!(next > self.current, "boot phase {} after {}", next, self.current);
        log::info!("boot: phase {} -> {}", self.current, next);
        self.current = next;
    }

    /// Check if phase is at least the specified level
    pub fn is_at_least(&self, phase: BootPhase) -> bool {
        self.current >= phase
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_only_move_forward() {
        let mut phases = PhaseTracker::new();
        phases.advance(BootPhase::Registry);
        phases.advance(BootPhase::Rpc);
        assert!(phases.is_at_least(BootPhase::Dqdt));
        assert!(!phases.is_at_least(BootPhase::Complete));
    }

    #[test]
    #[should_panic(expected = "boot phase")]
    fn test_going_back_panics() {
        let mut phases = PhaseTracker::new();
        phases.advance(BootPhase::Dqdt);
        phases.advance(BootPhase::Registry);
    }
}
