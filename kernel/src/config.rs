//! Kernel configuration
//!
//! Compile-time capacities for the fixed-size arenas, and the runtime
//! tunables (`KernelConfig`) chosen once at boot and shared read-only by
//! every cluster.

use crate::boot::BootError;

// ═══════════════════════════════════════════════════════════════
// Capacities
// ═══════════════════════════════════════════════════════════════

/// Maximum number of clusters in the machine
pub const CLUSTER_NR_MAX: usize = 64;

/// Maximum number of CPUs inside one cluster
pub const CPU_PER_CLUSTER_MAX: usize = 4;

/// Size of the global CPU id space
pub const CPU_NR_MAX: usize = CLUSTER_NR_MAX * CPU_PER_CLUSTER_MAX;

/// Slots in each CPU's local thread table (idle thread included)
pub const CPU_MAX_THREADS: usize = 64;

/// Slots in each CPU's cross-CPU event table
pub const EVENT_SLOTS: usize = 32;

/// Depth of every RPC FIFO (power of two)
pub const RPC_FIFO_DEPTH: usize = 64;

/// RPC manager threads that may be created per CPU
pub const RPC_MANAGERS_MAX: usize = 4;

/// Number of buddy orders tracked by the physical page allocator
pub const PPM_MAX_ORDER: usize = 11;

/// Fan-out of the decision tree
pub const DQDT_ARITY: usize = 4;

/// Deepest tree the arena supports (4^8 leaves, far above CLUSTER_NR_MAX)
pub const DQDT_LEVELS_MAX: usize = 8;

// ═══════════════════════════════════════════════════════════════
// Runtime tunables
// ═══════════════════════════════════════════════════════════════

/// Tunables shared by the scheduler, the DQDT and the RPC transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Ticks a thread runs before it is marked for rescheduling
    pub quantum_ticks: u32,
    /// Ticks between two load-balancing evaluations (rounded up to a multiple of the quantum)
    pub balance_period_ticks: u32,
    /// Local CPU usage (percent) above which a CPU tries to export a thread
    pub usage_high_water: u8,
    /// Parent-level usage (percent) below which exporting is worthwhile
    pub usage_low_water: u8,
    /// Ticks between two leaf indicator updates
    pub dqdt_update_period: u32,
    /// Usage thresholds tried, in order, after the strict LTCN placement fails
    pub dqdt_usage_thresholds: [u16; 2],
    /// Commit-or-retry attempts for one placement strategy
    pub placement_retries: u32,
    /// Smallest randomized backoff window, in spins
    pub rpc_backoff_min_spins: u32,
    /// Largest randomized backoff window, in spins
    pub rpc_backoff_max_spins: u32,
    /// Minimum free pages a cluster must hold to receive a memory placement
    pub mem_min_free_pages: usize,
}

impl KernelConfig {
    pub const fn default() -> Self {
        Self {
            quantum_ticks: 4,
            balance_period_ticks: 16,
            usage_high_water: 80,
            usage_low_water: 50,
            dqdt_update_period: 4,
            dqdt_usage_thresholds: [100, 200],
            placement_retries: 3,
            rpc_backoff_min_spins: 4,
            rpc_backoff_max_spins: 1024,
            mem_min_free_pages: 1,
        }
    }

    pub const fn with_quantum(mut self, ticks: u32) -> Self {
        self.quantum_ticks = ticks;
        self
    }

    pub const fn with_balance_period(mut self, ticks: u32) -> Self {
        self.balance_period_ticks = ticks;
        self
    }

    pub const fn with_water_marks(mut self, high: u8, low: u8) -> Self {
        self.usage_high_water = high;
        self.usage_low_water = low;
        self
    }

    pub const fn with_usage_thresholds(mut self, thresholds: [u16; 2]) -> Self {
        self.dqdt_usage_thresholds = thresholds;
        self
    }

    pub const fn with_placement_retries(mut self, retries: u32) -> Self {
        self.placement_retries = retries;
        self
    }

    pub const fn with_backoff(mut self, min_spins: u32, max_spins: u32) -> Self {
        self.rpc_backoff_min_spins = min_spins;
        self.rpc_backoff_max_spins = max_spins;
        self
    }

    pub const fn with_mem_min_free_pages(mut self, pages: usize) -> Self {
        self.mem_min_free_pages = pages;
        self
    }

    /// Balancing period actually used: the configured period rounded up
    /// to a whole number of quanta.
    pub const fn effective_balance_period(&self) -> u32 {
        let q = self.quantum_ticks;
        let p = self.balance_period_ticks;
        if p <= q {
            q
        } else {
            (p + q - 1) / q * q
        }
    }

    /// Reject combinations that cannot work; called once at boot.
    pub fn validate(&self) -> Result<(), BootError> {
        if self.quantum_ticks == 0 || self.dqdt_update_period == 0 {
            return Err(BootError::InvalidConfig);
        }
        if self.usage_high_water > 100 || self.usage_low_water > self.usage_high_water {
            return Err(BootError::InvalidConfig);
        }
        if self.dqdt_usage_thresholds[0] > self.dqdt_usage_thresholds[1] {
            return Err(BootError::InvalidConfig);
        }
        if self.placement_retries == 0 {
            return Err(BootError::InvalidConfig);
        }
        if self.rpc_backoff_min_spins == 0 || self.rpc_backoff_min_spins > self.rpc_backoff_max_spins {
            return Err(BootError::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_period_rounds_to_quantum() {
        let cfg = KernelConfig::default().with_quantum(4).with_balance_period(10);
        assert_eq!(cfg.effective_balance_period(), 12);

        let cfg = KernelConfig::default().with_quantum(4).with_balance_period(2);
        assert_eq!(cfg.effective_balance_period(), 4);
    }

    #[test]
    fn test_validate_rejects_inverted_water_marks() {
        let cfg = KernelConfig::default().with_water_marks(40, 60);
        assert_eq!(cfg.validate(), Err(BootError::InvalidConfig));
        assert!(KernelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_capacities() {
        static_assertions::const_assert!(RPC_FIFO_DEPTH.is_power_of_two());
        static_assertions::const_assert!(CPU_PER_CLUSTER_MAX <= 255);
        static_assertions::const_assert!(CPU_NR_MAX <= u16::MAX as usize);
    }
}
