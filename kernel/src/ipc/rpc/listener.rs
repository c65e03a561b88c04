//! RPC listener - the receiving end of a remote FIFO pair
//!
//! One listener per CPU and one per cluster. Each holds a FIFO per
//! priority, a `pending` flag that senders raise to request service and a
//! `handled` token naming the single thread allowed to drain it.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::message::{RpcDescriptor, RpcPriority};
use crate::cluster::ClusterId;
use crate::config::RPC_FIFO_DEPTH;
use crate::ipc::core::MpmcRing;
use crate::scheduler::ThreadId;

/// No thread holds the token
const NO_DRAINER: u32 = 0;

pub struct RpcListener {
    home: ClusterId,
    fifos: [MpmcRing<RpcDescriptor>; RpcPriority::COUNT],
    /// Service requested and not yet acknowledged by a drainer
    pending: AtomicBool,
    /// Thread currently draining, `NO_DRAINER` if none
    handled: AtomicU32,
    served: AtomicU64,
}

impl RpcListener {
    pub fn new(home: ClusterId) -> Self {
        Self {
            home,
            fifos: core::array::from_fn(|_| MpmcRing::new(RPC_FIFO_DEPTH)),
            pending: AtomicBool::new(false),
            handled: AtomicU32::new(NO_DRAINER),
            served: AtomicU64::new(0),
        }
    }

    /// Cluster whose memory hosts the FIFOs
    pub fn home(&self) -> ClusterId {
        self.home
    }

    /// Enqueue; gives the descriptor back when the FIFO is full
    pub(crate) fn push(&self, desc: RpcDescriptor) -> Result<(), RpcDescriptor> {
        self.fifos[desc.message.priority.index()].push(desc)
    }

    /// Next descriptor, Normal before Lazy
    pub(crate) fn pop(&self) -> Option<RpcDescriptor> {
        self.fifos.iter().find_map(|fifo| fifo.pop())
    }

    pub fn is_empty(&self) -> bool {
        self.fifos.iter().all(|fifo| fifo.is_empty())
    }

    pub fn queued(&self, priority: RpcPriority) -> usize {
        self.fifos[priority.index()].len()
    }

    /// Raise the pending flag; true if this call moved it from 0 to 1
    pub(crate) fn signal(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Take the drain token for `drainer`
    pub(crate) fn claim(&self, drainer: ThreadId) -> bool {
        self.handled
            .compare_exchange(NO_DRAINER, drainer.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the token back if `drainer` still holds it
    pub(crate) fn release(&self, drainer: ThreadId) -> bool {
        self.handled
            .compare_exchange(drainer.0, NO_DRAINER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_held_by(&self, drainer: ThreadId) -> bool {
        self.handled.load(Ordering::Acquire) == drainer.0
    }

    /// Current token holder
    pub fn drainer(&self) -> Option<ThreadId> {
        match self.handled.load(Ordering::Acquire) {
            NO_DRAINER => None,
            tid => Some(ThreadId(tid)),
        }
    }

    /// Drop the token of a thread that is about to block, so another
    /// thread can take over
    pub fn relinquish(&self, drainer: ThreadId) -> bool {
        let released = self.release(drainer);
        if released {
            log::trace!("rpc: thread {} relinquished listener of {}", drainer.0, self.home);
        }
        released
    }

    pub(crate) fn account(&self, served: usize) {
        self.served.fetch_add(served as u64, Ordering::Relaxed);
    }

    /// Requests served since boot
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_exclusive() {
        let listener = RpcListener::new(ClusterId(0));
        assert!(listener.claim(ThreadId(3)));
        assert!(!listener.claim(ThreadId(4)));
        assert!(listener.is_held_by(ThreadId(3)));
        assert!(!listener.release(ThreadId(4)));
        assert!(listener.relinquish(ThreadId(3)));
        assert_eq!(listener.drainer(), None);
        assert!(listener.claim(ThreadId(4)));
    }

    #[test]
    fn test_pending_edge() {
        let listener = RpcListener::new(ClusterId(1));
        assert!(listener.signal());
        assert!(!listener.signal());
        listener.clear_pending();
        assert!(listener.signal());
    }
}
