//! RPC messages, targets and response slots

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};

use super::error::{RpcError, RpcResult};
use crate::arch::{Backoff, Fabric};
use crate::cluster::{ClusterId, GlobalCpuId};
use crate::scheduler::ThreadId;

/// Priority class; FIFOs are drained in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RpcPriority {
    /// Caller blocks until the response is written back
    Normal = 0,
    /// Fire and forget, no response
    Lazy = 1,
}

impl RpcPriority {
    pub const COUNT: usize = 2;
    pub const ALL: [RpcPriority; Self::COUNT] = [RpcPriority::Normal, RpcPriority::Lazy];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Endpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RpcId(pub u16);

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc#{}", self.0)
    }
}

/// Destination listener of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcTarget {
    /// The listener of one CPU
    Cpu(GlobalCpuId),
    /// The listener shared by every CPU of a cluster
    Cluster(ClusterId),
}

impl RpcTarget {
    /// Cluster physically hosting the target listener
    pub fn cluster(&self) -> ClusterId {
        match *self {
            Self::Cpu(gid) => gid.cluster(),
            Self::Cluster(cid) => cid,
        }
    }
}

impl fmt::Display for RpcTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu(gid) => write!(f, "{}", gid),
            Self::Cluster(cid) => write!(f, "{}", cid),
        }
    }
}

/// Response buffer owned by the sender.
///
/// The handler writes the marshalled response into it with a remote copy,
/// then raises `ready`; the sender never reads the receiver's memory.
pub struct ResponseSlot {
    ready: AtomicBool,
    data: spin::Mutex<Vec<u8>>,
    error: spin::Mutex<Option<RpcError>>,
    owner: ClusterId,
    waiter: ThreadId,
}

impl ResponseSlot {
    pub fn new(owner: ClusterId, waiter: ThreadId, buffer: Vec<u8>) -> Self {
        Self {
            ready: AtomicBool::new(false),
            data: spin::Mutex::new(buffer),
            error: spin::Mutex::new(None),
            owner,
            waiter,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> ClusterId {
        self.owner
    }

    pub fn waiter(&self) -> ThreadId {
        self.waiter
    }

    /// Copy `payload` (hosted by `from`) into the sender's buffer and
    /// publish it
    pub fn complete(&self, fabric: &dyn Fabric, payload: &[u8], from: ClusterId) {
        {
            let mut data = self.data.lock();
            data.clear();
            data.resize(payload.len(), 0);
            fabric.remote_memcpy(&mut data, self.owner, payload, from);
        }
        self.ready.store(true, Ordering::Release);
    }

    /// Publish a failure instead of a response
    pub fn fail(&self, error: RpcError) {
        *self.error.lock() = Some(error);
        self.ready.store(true, Ordering::Release);
    }

    /// Take the published outcome (call once `is_ready()`)
    pub fn take(&self) -> RpcResult<Vec<u8>> {
        if let Some(error) = self.error.lock().take() {
            return Err(error);
        }
        Ok(core::mem::take(&mut *self.data.lock()))
    }
}

/// A request as built by the sender
pub struct RpcMessage {
    pub origin: GlobalCpuId,
    pub priority: RpcPriority,
    pub endpoint: RpcId,
    pub sender: ThreadId,
    pub payload: Vec<u8>,
    /// Present for Normal priority only
    pub response: Option<Arc<ResponseSlot>>,
}

/// What actually travels through the remote FIFO
pub struct RpcDescriptor {
    pub message: Arc<RpcMessage>,
    pub size: usize,
    pub origin_cluster: ClusterId,
}

impl RpcDescriptor {
    pub fn new(message: Arc<RpcMessage>) -> Self {
        Self {
            size: message.payload.len(),
            origin_cluster: message.origin.cluster(),
            message,
        }
    }
}

/// Allocate a scratch buffer of `capacity` bytes.
///
/// Allocation failure is not recoverable here: the caller busy-waits with
/// backoff until memory shows up.
pub fn scratch_buffer(fabric: &dyn Fabric, capacity: usize, seed: u64) -> Vec<u8> {
    let mut backoff: Option<Backoff> = None;
    loop {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(capacity).is_ok() {
            return buf;
        }
        let backoff = backoff.get_or_insert_with(|| {
            log::warn!("rpc: no memory for a {} byte scratch buffer, waiting", capacity);
            Backoff::new(16, 4096, seed)
        });
        backoff.spin(fabric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SharedMemoryFabric;

    #[test]
    fn test_response_slot_publish() {
        let fabric = SharedMemoryFabric::new();
        let slot = ResponseSlot::new(ClusterId(0), ThreadId(7), Vec::new());
        assert!(!slot.is_ready());
        slot.complete(&fabric, &[1, 2, 3], ClusterId(2));
        assert!(slot.is_ready());
        assert_eq!(slot.take().unwrap(), [1, 2, 3]);
        assert_eq!(fabric.bytes_copied(), 3);
    }

    #[test]
    fn test_response_slot_failure() {
        let slot = ResponseSlot::new(ClusterId(0), ThreadId(7), Vec::new());
        slot.fail(RpcError::Decode);
        assert!(slot.is_ready());
        assert_eq!(slot.take(), Err(RpcError::Decode));
    }

    #[test]
    fn test_target_cluster() {
        let gid = GlobalCpuId::new(ClusterId(3), crate::cluster::CpuId(1));
        assert_eq!(RpcTarget::Cpu(gid).cluster(), ClusterId(3));
        assert_eq!(RpcTarget::Cluster(ClusterId(2)).cluster(), ClusterId(2));
    }
}
