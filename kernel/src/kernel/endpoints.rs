//! Built-in RPC endpoints
//!
//! Each endpoint holds a weak reference to the kernel: the handler table
//! lives inside the kernel, so a strong one would keep it alive forever.

use alloc::sync::{Arc, Weak};

use super::{Kernel, KernelError, KernelResult};
use crate::ipc::rpc::{RpcContext, RpcEndpoint, RpcError, RpcId, RpcPriority, RpcResult, RpcTransport};
use crate::scheduler::{Handoff, SchedEvent, Thread, ThreadId};

fn kernel_of(weak: &Weak<Kernel>, id: RpcId) -> KernelResult<Arc<Kernel>> {
    weak.upgrade().ok_or(KernelError::Rpc(RpcError::HandlerUnavailable { id: id.0 }))
}

/// Liveness probe: answers `value + 1`
pub struct Ping;

impl RpcEndpoint for Ping {
    const ID: RpcId = RpcId(1);
    const NAME: &'static str = "ping";
    const PRIORITY: RpcPriority = RpcPriority::Normal;

    type Request = u64;
    type Response = u64;

    fn handle(&self, _ctx: &RpcContext, value: u64) -> u64 {
        value.wrapping_add(1)
    }
}

/// Insert a migrated thread on the serving CPU
pub struct ThreadImport(pub(crate) Weak<Kernel>);

impl RpcEndpoint for ThreadImport {
    const ID: RpcId = RpcId(2);
    const NAME: &'static str = "thread_import";
    const PRIORITY: RpcPriority = RpcPriority::Normal;

    type Request = Handoff;
    type Response = KernelResult<ThreadId>;

    fn handle(&self, ctx: &RpcContext, handoff: Handoff) -> Self::Response {
        let kernel = kernel_of(&self.0, Self::ID)?;
        let tid = kernel.scheduler(handoff.to)?.import(handoff)?;
        log::trace!("rpc: {} imported {} for {}", ctx.cpu, tid, ctx.origin);
        Ok(tid)
    }
}

/// Register and queue a freshly created thread on the serving CPU
pub struct ThreadCreateRemote(pub(crate) Weak<Kernel>);

impl RpcEndpoint for ThreadCreateRemote {
    const ID: RpcId = RpcId(3);
    const NAME: &'static str = "thread_create";
    const PRIORITY: RpcPriority = RpcPriority::Normal;

    type Request = Thread;
    type Response = KernelResult<ThreadId>;

    fn handle(&self, _ctx: &RpcContext, thread: Thread) -> Self::Response {
        let kernel = kernel_of(&self.0, Self::ID)?;
        let cpu = thread.cpu();
        let tid = kernel.scheduler(cpu)?.enqueue(thread)?;
        Ok(tid)
    }
}

/// Wake a thread living on the serving CPU; nobody waits for the answer
pub struct RemoteWakeup(pub(crate) Weak<Kernel>);

impl RpcEndpoint for RemoteWakeup {
    const ID: RpcId = RpcId(4);
    const NAME: &'static str = "remote_wakeup";
    const PRIORITY: RpcPriority = RpcPriority::Lazy;

    type Request = ThreadId;
    type Response = ();

    fn handle(&self, ctx: &RpcContext, tid: ThreadId) {
        let kernel = match self.0.upgrade() {
            Some(kernel) => kernel,
            None => return,
        };
        let posted = kernel
            .events(ctx.cpu)
            .and_then(|events| events.post(SchedEvent::Wakeup(tid)).map_err(KernelError::from));
        if let Err(err) = posted {
            log::warn!("rpc: {} could not wake {} for {}: {}", ctx.cpu, tid, ctx.origin, err);
        }
    }
}

/// Install every built-in endpoint in `rpc`
pub(crate) fn register_all(rpc: &RpcTransport, kernel: &Weak<Kernel>) -> RpcResult<()> {
    rpc.register(Ping)?;
    rpc.register(ThreadImport(kernel.clone()))?;
    rpc.register(ThreadCreateRemote(kernel.clone()))?;
    rpc.register(RemoteWakeup(kernel.clone()))?;
    Ok(())
}
