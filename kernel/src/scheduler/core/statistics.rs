//! Per-CPU scheduler statistics

/// Counters kept by one CPU's scheduler (read under its lock)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Calls to `elect`
    pub elections: u64,
    /// Elections that picked a different thread
    pub switches: u64,
    pub ticks: u64,
    pub balance_passes: u64,
    /// Threads selected as migration victims
    pub exports: u64,
    /// Threads received through migration
    pub imports: u64,
    pub wakeups: u64,
    /// Ticks spent running something other than idle
    pub busy_ticks: u64,
}

impl SchedulerStats {
    pub const fn new() -> Self {
        Self {
            elections: 0,
            switches: 0,
            ticks: 0,
            balance_passes: 0,
            exports: 0,
            imports: 0,
            wakeups: 0,
            busy_ticks: 0,
        }
    }
}
