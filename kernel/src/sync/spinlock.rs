//! Spinlock with local interrupts disabled while held

use core::ops::{Deref, DerefMut};

use crate::arch::IrqGuard;

/// `spin::Mutex` that masks local interrupts for the lifetime of the guard,
/// so an interrupt handler on the same CPU can never spin on it.
pub struct IrqSpinLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.inner.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }

    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        self.inner
            .try_lock()
            .map(|guard| IrqSpinLockGuard { guard, _irq: irq })
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Guard; the lock is released before interrupts are restored
pub struct IrqSpinLockGuard<'a, T> {
    // Field order matters: `guard` drops first.
    guard: spin::MutexGuard<'a, T>,
    _irq: IrqGuard,
}

impl<'a, T> Deref for IrqSpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for IrqSpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
