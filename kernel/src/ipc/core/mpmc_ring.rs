//! MPMC Ring - bounded lock-free multi-producer multi-consumer queue
//!
//! Backing store of every remote RPC FIFO.
//!
//! ## Algorithm:
//! - Each slot carries a sequence number telling whose turn it is
//! - A producer at position `p` owns slot `p & mask` once `seq == p`;
//!   it writes the value and publishes `seq = p + 1`
//! - A consumer at position `c` owns the slot once `seq == c + 1`;
//!   it moves the value out and releases `seq = c + capacity`
//! - Positions are claimed with CAS, so no producer or consumer ever
//!   blocks another one; a full ring makes `push` fail immediately
//!
//! ## Memory Layout:
//! ```text
//! +-------------------+
//! | enqueue position  |  <- own cache line
//! +-------------------+
//! | dequeue position  |  <- own cache line
//! +-------------------+
//! | Slot[0]           |  <- sequence + value
//! | ...               |
//! | Slot[N-1]         |
//! +-------------------+
//! ```

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::sequence::CacheLineCounter;

/// One ring slot
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer multi-consumer ring
pub struct MpmcRing<T> {
    enqueue_pos: CacheLineCounter,
    dequeue_pos: CacheLineCounter,
    mask: usize,
    slots: Box<[Slot<T>]>,
}

// Values are moved in by exactly one producer and out by exactly one
// consumer, ordered by the slot sequence.
unsafe impl<T: Send> Send for MpmcRing<T> {}
unsafe impl<T: Send> Sync for MpmcRing<T> {}

impl<T> MpmcRing<T> {
    /// Create a ring holding `capacity` elements (power of two, >= 2)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity >= 2, "Capacity must be a power of 2");

        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            enqueue_pos: CacheLineCounter::new(0),
            dequeue_pos: CacheLineCounter::new(0),
            mask: capacity - 1,
            slots,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Try to append `value`; hands it back when the ring is full
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        slot.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Slot still holds the value from one lap ago
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the oldest element, if any
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence.store(pos + self.mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of queued elements
    pub fn len(&self) -> usize {
        let head = self.dequeue_pos.load(Ordering::Acquire);
        let tail = self.enqueue_pos.load(Ordering::Acquire);
        tail.saturating_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
