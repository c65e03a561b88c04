//! Remote word access
//!
//! Uncached loads, stores and compare-and-swap on a word physically hosted
//! by another cluster. Every cross-cluster flag in the core (listener
//! `pending`/`handled`, CPU `in_kernel`, DQDT leaf counters, event slots)
//! goes through these helpers so the port can map them onto the real
//! remote-access instructions.
//!
//! In a single shared address space they are sequentially-consistent atomics.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::cluster::ClusterId;

/// A word that can be accessed from any cluster
pub trait RemoteWord {
    type Value: Copy + Eq;

    fn remote_load(&self) -> Self::Value;
    fn remote_store(&self, value: Self::Value);
    fn remote_cas(&self, current: Self::Value, new: Self::Value) -> Result<Self::Value, Self::Value>;
}

macro_rules! impl_remote_word {
    ($atomic:ty, $value:ty) => {
        impl RemoteWord for $atomic {
            type Value = $value;

            #[inline]
            fn remote_load(&self) -> $value {
                self.load(Ordering::SeqCst)
            }

            #[inline]
            fn remote_store(&self, value: $value) {
                self.store(value, Ordering::SeqCst)
            }

            #[inline]
            fn remote_cas(&self, current: $value, new: $value) -> Result<$value, $value> {
                self.compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            }
        }
    };
}

impl_remote_word!(AtomicBool, bool);
impl_remote_word!(AtomicU32, u32);
impl_remote_word!(AtomicU64, u64);
impl_remote_word!(AtomicUsize, usize);

/// Remote load word
#[inline]
pub fn remote_lw<W: RemoteWord>(word: &W, _home: ClusterId) -> W::Value {
    word.remote_load()
}

/// Remote store word
#[inline]
pub fn remote_sw<W: RemoteWord>(word: &W, _home: ClusterId, value: W::Value) {
    word.remote_store(value)
}

/// Remote compare-and-swap; true when `new` was installed
#[inline]
pub fn remote_cas<W: RemoteWord>(word: &W, _home: ClusterId, current: W::Value, new: W::Value) -> bool {
    word.remote_cas(current, new).is_ok()
}
