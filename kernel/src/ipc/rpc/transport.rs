//! RPC transport
//!
//! ## Call path (sender):
//! 1. Marshal the request into a scratch buffer owned by the sender
//! 2. Push a descriptor into the target FIFO of the right priority;
//!    while the FIFO refuses, serve our own listeners and back off
//! 3. Raise the target's pending flag; on a 0 -> 1 edge, IPI the target
//!    CPU unless it already runs kernel code
//! 4. Normal priority: serve our own listeners until the handler has
//!    written the response back into our buffer
//!
//! ## Drain path (receiver):
//! The thread holding the listener token pops descriptors (Normal first),
//! copies each request locally, runs the handler and copies the response
//! back. It stops when the FIFOs are empty and the pending flag has been
//! cleared, or as soon as it loses the token.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use super::endpoint::{HandlerTable, RpcContext, RpcEndpoint};
use super::error::{RpcError, RpcResult};
use super::listener::RpcListener;
use super::message::{scratch_buffer, ResponseSlot, RpcDescriptor, RpcMessage, RpcPriority, RpcTarget};
use crate::arch::{Backoff, Fabric};
use crate::cluster::{ClusterId, ClusterRegistry, GlobalCpuId};
use crate::config::KernelConfig;
use crate::scheduler::{ExecContext, ThreadId};

/// Transport counters
#[derive(Debug, Default)]
pub struct RpcStats {
    sent: AtomicU64,
    lazy_sent: AtomicU64,
    served: AtomicU64,
    fifo_refusals: AtomicU64,
    ipis: AtomicU64,
    wait_rounds: AtomicU64,
    failures: AtomicU64,
}

/// Copy of the counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcStatsSnapshot {
    pub sent: u64,
    pub lazy_sent: u64,
    pub served: u64,
    pub fifo_refusals: u64,
    pub ipis: u64,
    pub wait_rounds: u64,
    pub failures: u64,
}

impl RpcStats {
    pub fn snapshot(&self) -> RpcStatsSnapshot {
        RpcStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            lazy_sent: self.lazy_sent.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            fifo_refusals: self.fifo_refusals.load(Ordering::Relaxed),
            ipis: self.ipis.load(Ordering::Relaxed),
            wait_rounds: self.wait_rounds.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

pub struct RpcTransport {
    registry: Arc<ClusterRegistry>,
    fabric: Arc<dyn Fabric>,
    handlers: HandlerTable,
    /// Indexed by the registry's dense CPU slot
    cpu_listeners: Vec<RpcListener>,
    /// Indexed by cluster id
    cluster_listeners: Vec<RpcListener>,
    backoff_min: u32,
    backoff_max: u32,
    seed: AtomicU64,
    stats: RpcStats,
}

/// Initial scratch capacity for a marshalled `T`
fn size_hint<T>() -> usize {
    core::mem::size_of::<T>() + 16
}

impl RpcTransport {
    pub fn new(registry: Arc<ClusterRegistry>, fabric: Arc<dyn Fabric>, config: &KernelConfig) -> Self {
        let cpu_listeners = registry.cpus().map(|cpu| RpcListener::new(cpu.cluster())).collect();
        let cluster_listeners = registry.clusters().map(|c| RpcListener::new(c.id())).collect();
        Self {
            registry,
            fabric,
            handlers: HandlerTable::new(),
            cpu_listeners,
            cluster_listeners,
            backoff_min: config.rpc_backoff_min_spins,
            backoff_max: config.rpc_backoff_max_spins,
            seed: AtomicU64::new(0x9e37_79b9_7f4a_7c15),
            stats: RpcStats::default(),
        }
    }

    pub fn register<E: RpcEndpoint>(&self, endpoint: E) -> RpcResult<()> {
        self.handlers.register(endpoint)
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn fabric(&self) -> &dyn Fabric {
        &*self.fabric
    }

    pub fn stats(&self) -> RpcStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cpu_listener(&self, gid: GlobalCpuId) -> Option<&RpcListener> {
        self.cpu_listeners.get(self.registry.cpu_slot(gid)?)
    }

    pub fn cluster_listener(&self, cluster: ClusterId) -> Option<&RpcListener> {
        self.registry.cluster(cluster)?;
        self.cluster_listeners.get(cluster.index())
    }

    pub fn listener(&self, target: RpcTarget) -> Option<&RpcListener> {
        match target {
            RpcTarget::Cpu(gid) => self.cpu_listener(gid),
            RpcTarget::Cluster(cid) => self.cluster_listener(cid),
        }
    }

    fn backoff(&self, ctx: &ExecContext) -> Backoff {
        let seed = self.seed.fetch_add(0x9e37_79b9, Ordering::Relaxed)
            ^ ((ctx.thread.0 as u64) << 32)
            ^ ctx.cpu.0 as u64;
        Backoff::new(self.backoff_min, self.backoff_max, seed)
    }

    /// Issue a call of endpoint `E` to `target`.
    ///
    /// Normal endpoints return `Some(response)` once the handler has run;
    /// Lazy endpoints return `None` as soon as the request is queued.
    /// There is no timeout: a stalled receiver stalls the caller.
    pub fn call<E: RpcEndpoint>(
        &self,
        ctx: &ExecContext,
        target: RpcTarget,
        request: &E::Request,
    ) -> RpcResult<Option<E::Response>> {
        let listener = self.listener(target).ok_or(RpcError::InvalidTarget)?;
        let handler = self
            .handlers
            .get(E::ID)
            .ok_or(RpcError::UnknownEndpoint { id: E::ID.0 })?;
        if handler.priority() != E::PRIORITY {
            return Err(RpcError::PriorityMismatch { id: E::ID.0 });
        }

        let mut backoff = self.backoff(ctx);
        let scratch = scratch_buffer(&*self.fabric, size_hint::<E::Request>(), backoff.window() as u64);
        let payload = postcard::to_extend(request, scratch).map_err(|_| RpcError::Encode)?;

        let response = match E::PRIORITY {
            RpcPriority::Normal => {
                let buffer = scratch_buffer(&*self.fabric, size_hint::<E::Response>(), ctx.thread.0 as u64);
                Some(Arc::new(ResponseSlot::new(ctx.cpu.cluster(), ctx.thread, buffer)))
            }
            RpcPriority::Lazy => None,
        };

        let message = Arc::new(RpcMessage {
            origin: ctx.cpu,
            priority: E::PRIORITY,
            endpoint: E::ID,
            sender: ctx.thread,
            payload,
            response: response.clone(),
        });

        log::trace!("rpc: {} -> {} {} ({} bytes)", ctx.cpu, target, E::NAME, message.payload.len());
        self.enqueue(ctx, target, listener, RpcDescriptor::new(message), &mut backoff);
        self.notify(target, listener);

        let slot = match response {
            Some(slot) => slot,
            None => {
                self.stats.lazy_sent.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };
        self.stats.sent.fetch_add(1, Ordering::Relaxed);

        backoff.reset();
        while !slot.is_ready() {
            self.stats.wait_rounds.fetch_add(1, Ordering::Relaxed);
            if self.serve_local(ctx) == 0 {
                backoff.spin(&*self.fabric);
            }
        }

        let bytes = slot.take().map_err(|e| {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        let response = postcard::from_bytes(&bytes).map_err(|_| RpcError::Decode)?;
        Ok(Some(response))
    }

    fn enqueue(&self, ctx: &ExecContext, target: RpcTarget, listener: &RpcListener, desc: RpcDescriptor, backoff: &mut Backoff) {
        let mut desc = desc;
        loop {
            if !self.fabric.fifo_congested(target.cluster()) {
                match listener.push(desc) {
                    Ok(()) => return,
                    Err(back) => desc = back,
                }
            }
            self.stats.fifo_refusals.fetch_add(1, Ordering::Relaxed);
            // Our own listeners may be what the receiver is waiting on
            self.serve_local(ctx);
            backoff.spin(&*self.fabric);
        }
    }

    /// Raise the pending flag of `listener`; IPI on the rising edge
    fn notify(&self, target: RpcTarget, listener: &RpcListener) {
        if !listener.signal() {
            return;
        }
        let cpu = match target {
            RpcTarget::Cpu(gid) => self.registry.cpu(gid),
            RpcTarget::Cluster(cid) => {
                let cluster = match self.registry.cluster(cid) {
                    Some(cluster) => cluster,
                    None => return,
                };
                if cluster.cpus().iter().any(|c| c.in_kernel()) {
                    return;
                }
                cluster.cpus().first()
            }
        };
        if let Some(cpu) = cpu {
            if !cpu.in_kernel() {
                self.fabric.send_ipi(cpu.gid());
                self.stats.ipis.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Serve the listeners of `ctx.cpu` (its own and its cluster's)
    pub fn serve_local(&self, ctx: &ExecContext) -> usize {
        self.drain(RpcTarget::Cpu(ctx.cpu), ctx.cpu, ctx.thread)
            + self.drain(RpcTarget::Cluster(ctx.cpu.cluster()), ctx.cpu, ctx.thread)
    }

    /// Drain the listener of `target` from `cpu` on behalf of `drainer`.
    ///
    /// Returns the number of requests served; 0 when another thread holds
    /// the token (it will see whatever is queued).
    pub fn drain(&self, target: RpcTarget, cpu: GlobalCpuId, drainer: ThreadId) -> usize {
        let listener = match self.listener(target) {
            Some(l) => l,
            None => return 0,
        };
        if listener.is_empty() && !listener.is_pending() {
            return 0;
        }

        let mut served = 0;
        loop {
            if !listener.claim(drainer) {
                break;
            }
            let (count, kept_token) = self.drain_claimed(listener, cpu, drainer);
            served += count;
            if !kept_token {
                break;
            }
            listener.release(drainer);

            // A sender that failed to claim while we held the token relies
            // on us to see its request
            if listener.is_empty() {
                break;
            }
        }
        if served > 0 {
            listener.account(served);
            self.stats.served.fetch_add(served as u64, Ordering::Relaxed);
        }
        served
    }

    fn drain_claimed(&self, listener: &RpcListener, cpu: GlobalCpuId, drainer: ThreadId) -> (usize, bool) {
        let mut served = 0;
        loop {
            while let Some(desc) = listener.pop() {
                self.dispatch(desc, cpu, drainer);
                served += 1;
                if !listener.is_held_by(drainer) {
                    log::debug!("rpc: {} lost listener token after {} requests", cpu, served);
                    return (served, false);
                }
            }
            listener.clear_pending();
            if listener.is_empty() {
                return (served, true);
            }
        }
    }

    fn dispatch(&self, desc: RpcDescriptor, cpu: GlobalCpuId, drainer: ThreadId) {
        let message = &desc.message;
        let local_cluster = cpu.cluster();

        let mut request = scratch_buffer(&*self.fabric, desc.size, drainer.0 as u64);
        request.resize(desc.size, 0);
        self.fabric
            .remote_memcpy(&mut request, local_cluster, &message.payload, desc.origin_cluster);

        let ctx = RpcContext {
            cpu,
            drainer,
            origin: message.origin,
            sender: message.sender,
            priority: message.priority,
        };
        let outcome = match self.handlers.get(message.endpoint) {
            Some(handler) => handler.invoke(&ctx, &request),
            None => Err(RpcError::UnknownEndpoint { id: message.endpoint.0 }),
        };

        match (&message.response, outcome) {
            (Some(slot), Ok(bytes)) => slot.complete(&*self.fabric, &bytes, local_cluster),
            (Some(slot), Err(error)) => slot.fail(error),
            (None, Err(error)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                if error.should_log() {
                    log::warn!("rpc: lazy {} from {} failed: {}", message.endpoint, message.origin, error);
                }
            }
            (None, Ok(_)) => {}
        }
    }

    /// Release every token `thread` holds on `cpu`'s listeners.
    ///
    /// Returns true when work was left behind, in which case somebody else
    /// has to be activated to drain it.
    pub fn relinquish(&self, cpu: GlobalCpuId, thread: ThreadId) -> bool {
        let mut stranded = false;
        for target in [RpcTarget::Cpu(cpu), RpcTarget::Cluster(cpu.cluster())] {
            if let Some(listener) = self.listener(target) {
                if listener.relinquish(thread) && !listener.is_empty() {
                    stranded = true;
                }
            }
        }
        stranded
    }

    /// True when one of `cpu`'s listeners has queued or signalled work
    pub fn has_work(&self, cpu: GlobalCpuId) -> bool {
        [RpcTarget::Cpu(cpu), RpcTarget::Cluster(cpu.cluster())]
            .into_iter()
            .filter_map(|t| self.listener(t))
            .any(|l| l.is_pending() || !l.is_empty())
    }
}
