// src/arch/mod.rs
// Abstraction d'architecture - the low-level API the portable core relies on
//
// The core never touches hardware directly. Remote memory access,
// inter-processor interrupts and local interrupt masking are provided by
// the architecture port through the `Fabric` and `IrqController` traits.

pub mod backoff;
pub mod remote;
pub mod shared;

pub use backoff::{Backoff, XorShift64};
pub use shared::SharedMemoryFabric;

use crate::cluster::{ClusterId, GlobalCpuId};

/// Cross-cluster primitives of the memory fabric
pub trait Fabric: Send + Sync {
    /// Raise an inter-processor interrupt on `target`
    fn send_ipi(&self, target: GlobalCpuId);

    /// Copy `src` (physically hosted by `src_cluster`) into `dst`
    /// (hosted by `dst_cluster`). Both slices have the same length.
    fn remote_memcpy(&self, dst: &mut [u8], _dst_cluster: ClusterId, src: &[u8], _src_cluster: ClusterId) {
        dst.copy_from_slice(src);
    }

    /// True when the remote FIFO ticket of `target` cannot be taken right
    /// now; the producer treats it exactly like a full FIFO.
    fn fifo_congested(&self, _target: ClusterId) -> bool {
        false
    }

    /// Pause inside a spin loop
    fn cpu_relax(&self) {
        core::hint::spin_loop();
    }
}

/// Local interrupt masking
pub trait IrqController: Sync {
    /// Disable local interrupts, returning whether they were enabled
    fn save_disable(&self) -> bool;
    /// Restore the state returned by `save_disable`
    fn restore(&self, was_enabled: bool);
}

static IRQ_CONTROLLER: spin::Once<&'static dyn IrqController> = spin::Once::new();

/// Install the port's interrupt controller (first call wins)
pub fn install_irq_controller(controller: &'static dyn IrqController) {
    IRQ_CONTROLLER.call_once(|| controller);
}

/// RAII guard for disabling/restoring local interrupts
///
/// Without an installed controller (host builds) the guard is a no-op.
pub struct IrqGuard {
    was_enabled: bool,
}

impl IrqGuard {
    pub fn new() -> Self {
        let was_enabled = match IRQ_CONTROLLER.get() {
            Some(ctrl) => ctrl.save_disable(),
            None => false,
        };
        Self { was_enabled }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if let Some(ctrl) = IRQ_CONTROLLER.get() {
            ctrl.restore(self.was_enabled);
        }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        disabled: AtomicUsize,
        restored: AtomicUsize,
    }

    impl IrqController for Counting {
        fn save_disable(&self) -> bool {
            self.disabled.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn restore(&self, was_enabled: bool) {
            assert!(was_enabled);
            self.restored.fetch_add(1, Ordering::SeqCst);
        }
    }

    static CONTROLLER: Counting = Counting {
        disabled: AtomicUsize::new(0),
        restored: AtomicUsize::new(0),
    };

    #[test]
    fn test_guard_pairs_disable_and_restore() {
        install_irq_controller(&CONTROLLER);
        let before = CONTROLLER.restored.load(Ordering::SeqCst);
        {
            let _guard = IrqGuard::new();
            assert!(CONTROLLER.disabled.load(Ordering::SeqCst) > before);
        }
        assert!(CONTROLLER.restored.load(Ordering::SeqCst) > before);
    }
}
