//! Boot Module
//!
//! Brings one kernel instance up on a validated topology, in phases.
//! Every failure here is fatal for the CPU running the boot: the port is
//! expected to log the error and halt.

pub mod phases;

pub use phases::{BootPhase, PhaseTracker};

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::arch::Fabric;
use crate::cluster::{ClusterRegistry, Topology};
use crate::config::KernelConfig;
use crate::dqdt::Dqdt;
use crate::kernel::{CpuCore, Kernel};
use crate::memory::PageAllocator;
use crate::scheduler::{CpuScheduler, Thread, ThreadType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootError {
    /// Mesh dimensions or CPU table do not describe a machine
    UnknownTopology,
    TooManyClusters { count: usize, max: usize },
    TooManyCpus { cluster: u16, count: usize },
    EmptyCluster { cluster: u16 },
    /// `KernelConfig::validate` refused the tunables
    InvalidConfig,
    /// A built-in RPC endpoint could not be registered
    EndpointRegistration { id: u16 },
    /// The idle thread of a CPU could not be installed
    IdleThread { cpu: u16 },
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTopology => write!(f, "unknown topology"),
            Self::TooManyClusters { count, max } => write!(f, "{} clusters (max {})", count, max),
            Self::TooManyCpus { cluster, count } => write!(f, "cluster {} has {} CPUs", cluster, count),
            Self::EmptyCluster { cluster } => write!(f, "cluster {} has no CPU", cluster),
            Self::InvalidConfig => write!(f, "invalid kernel configuration"),
            Self::EndpointRegistration { id } => write!(f, "RPC endpoint {} registration failed", id),
            Self::IdleThread { cpu } => write!(f, "no idle thread on CPU {}", cpu),
        }
    }
}

impl BootError {
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::UnknownTopology | Self::EmptyCluster { .. } => "Check the topology handed over by the boot loader",
            Self::TooManyClusters { .. } | Self::TooManyCpus { .. } => "Rebuild with larger CLUSTER_NR_MAX/CPU_PER_CLUSTER_MAX",
            Self::InvalidConfig => "Fix the kernel tunables",
            Self::EndpointRegistration { .. } | Self::IdleThread { .. } => "Kernel bug, report it",
        }
    }

    /// Boot errors halt the CPU
    pub fn is_recoverable(&self) -> bool {
        false
    }

    pub fn should_log(&self) -> bool {
        true
    }
}

/// Bring up the core on `topology`.
///
/// `fabric` provides the remote primitives, `ppm` the physical page
/// manager whose histograms seed the DQDT memory indicators.
pub fn boot(
    topology: Topology,
    config: KernelConfig,
    fabric: Arc<dyn Fabric>,
    ppm: Arc<dyn PageAllocator>,
) -> Result<Arc<Kernel>, BootError> {
    let mut phases = PhaseTracker::new();
    log::info!("═══════════════════════════════════════════════════════");
    log::info!("  ALMOS kernel core - placement and scheduling");
    log::info!("═══════════════════════════════════════════════════════");

    config.validate().map_err(|e| {
        log::error!("boot: {} ({})", e, e.recovery_hint());
        e
    })?;

    // REGISTRY
    phases.advance(BootPhase::Registry);
    let registry = Arc::new(ClusterRegistry::from_topology(topology).map_err(|e| {
        log::error!("boot: {} ({})", e, e.recovery_hint());
        e
    })?);

    // DQDT
    phases.advance(BootPhase::Dqdt);
    let dqdt = Arc::new(Dqdt::build(registry.clone(), ppm, config));
    dqdt.update();

    // SCHEDULERS are built before the RPC phase so the kernel can be
    // assembled in one piece; nothing runs until boot returns
    let mut cpus = Vec::with_capacity(registry.cpu_total());
    for cpu in registry.cpus() {
        let gid = cpu.gid();
        let mut sched = CpuScheduler::new(gid, config);
        sched
            .register_idle(Thread::new(ThreadType::Idle, gid))
            .map_err(|_| BootError::IdleThread { cpu: gid.0 })?;
        sched.elect().ok_or(BootError::IdleThread { cpu: gid.0 })?;
        cpus.push(CpuCore::new(gid, sched));
    }

    // RPC
    phases.advance(BootPhase::Rpc);
    let kernel = Kernel::assemble(config, registry, dqdt, fabric, cpus)?;

    phases.advance(BootPhase::Schedulers);
    log::info!(
        "boot: {} schedulers, {} RPC endpoints",
        kernel.registry().cpu_total(),
        kernel.rpc().handlers().len()
    );

    phases.advance(BootPhase::Complete);
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SharedMemoryFabric;
    use crate::cluster::{ClusterId, CpuId, GlobalCpuId};
    use crate::memory::BuddyAllocator;

    fn parts() -> (Arc<dyn Fabric>, Arc<dyn PageAllocator>) {
        (Arc::new(SharedMemoryFabric::new()), Arc::new(BuddyAllocator::new(4, 128)))
    }

    #[test]
    fn test_boot_two_by_two() {
        let (fabric, ppm) = parts();
        let kernel = boot(Topology::mesh(2, 2, 4), KernelConfig::default(), fabric, ppm).unwrap();
        assert_eq!(kernel.registry().cpu_total(), 16);
        assert_eq!(kernel.rpc().handlers().len(), 4);

        let gid = GlobalCpuId::new(ClusterId(3), CpuId(2));
        let sched = kernel.scheduler(gid).unwrap();
        assert!(sched.current().is_some());
        assert_eq!(sched.current(), sched.idle());
        drop(sched);

        let root = kernel.dqdt().snapshot(kernel.dqdt().root());
        assert_eq!(root.indicators.free.total_pages(), 4 * 128);
        assert_eq!(root.indicators.threads, 0);
    }

    #[test]
    fn test_boot_rejects_bad_input() {
        let (fabric, ppm) = parts();
        assert_eq!(
            boot(Topology::mesh(0, 2, 4), KernelConfig::default(), fabric.clone(), ppm.clone()).err(),
            Some(BootError::UnknownTopology)
        );
        let config = KernelConfig::default().with_quantum(0);
        assert_eq!(
            boot(Topology::mesh(1, 1, 1), config, fabric, ppm).err(),
            Some(BootError::InvalidConfig)
        );
    }
}
