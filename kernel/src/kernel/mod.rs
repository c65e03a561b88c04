//! Kernel service
//!
//! Ties the registry, the DQDT, the RPC transport and the per-CPU
//! schedulers together into the operations the rest of the kernel uses:
//! thread creation with placement, wakeup across CPUs and clusters, sleep,
//! the clock tick, migration at the user/kernel boundary and thread exit.
//!
//! ## Ownership rules
//! - A CPU's scheduler is locked only by CPUs of its own cluster
//! - Other clusters reach it through RPC (`ThreadImport`,
//!   `ThreadCreateRemote`, `RemoteWakeup`)
//! - No scheduler lock is ever held across an RPC call
//! - Lock order: RPC manager pool, then scheduler

pub mod endpoints;
pub mod error;

pub use endpoints::{Ping, RemoteWakeup, ThreadCreateRemote, ThreadImport};
pub use error::{errno, KernelError, KernelResult};
pub use crate::scheduler::ExecContext;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::Fabric;
use crate::boot::BootError;
use crate::cluster::{ClusterId, ClusterRegistry, CpuId, GlobalCpuId};
use crate::config::KernelConfig;
use crate::dqdt::{Dqdt, Placement, PlacementKind, PlacementRequest};
use crate::ipc::rpc::{ManagerAction, RpcError, RpcManager, RpcTarget, RpcTransport};
use crate::scheduler::{
    CpuScheduler, EventTable, Export, Handoff, SchedEvent, Thread, ThreadId, ThreadState, ThreadType,
};
use crate::sync::{IrqSpinLock, IrqSpinLockGuard};

/// Everything one CPU owns
pub struct CpuCore {
    gid: GlobalCpuId,
    sched: IrqSpinLock<CpuScheduler>,
    events: EventTable,
    managers: IrqSpinLock<RpcManager>,
}

impl CpuCore {
    pub fn new(gid: GlobalCpuId, sched: CpuScheduler) -> Self {
        Self {
            gid,
            sched: IrqSpinLock::new(sched),
            events: EventTable::new(gid),
            managers: IrqSpinLock::new(RpcManager::new()),
        }
    }

    pub fn gid(&self) -> GlobalCpuId {
        self.gid
    }
}

pub struct Kernel {
    config: KernelConfig,
    registry: Arc<ClusterRegistry>,
    dqdt: Arc<Dqdt>,
    rpc: RpcTransport,
    /// Indexed by the registry's dense CPU slot
    cpus: Vec<CpuCore>,
    /// Clock ticks seen by each cluster's first CPU
    cluster_ticks: Vec<AtomicU64>,
}

impl Kernel {
    /// Wire the parts built by `boot` together and register the endpoints
    pub(crate) fn assemble(
        config: KernelConfig,
        registry: Arc<ClusterRegistry>,
        dqdt: Arc<Dqdt>,
        fabric: Arc<dyn Fabric>,
        cpus: Vec<CpuCore>,
    ) -> Result<Arc<Self>, BootError> {
        let mut failure = None;
        let kernel = Arc::new_cyclic(|weak| {
            let rpc = RpcTransport::new(registry.clone(), fabric, &config);
            if let Err(err) = endpoints::register_all(&rpc, weak) {
                failure = Some(err);
            }
            let cluster_ticks = (0..registry.cluster_count()).map(|_| AtomicU64::new(0)).collect();
            Self {
                config,
                registry,
                dqdt,
                rpc,
                cpus,
                cluster_ticks,
            }
        });
        match failure {
            Some(err) => {
                log::error!("boot: {}", err);
                let id = match err {
                    RpcError::EndpointAlreadyRegistered { id } | RpcError::UnknownEndpoint { id } => id,
                    _ => 0,
                };
                Err(BootError::EndpointRegistration { id })
            }
            None => Ok(kernel),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn dqdt(&self) -> &Arc<Dqdt> {
        &self.dqdt
    }

    pub fn rpc(&self) -> &RpcTransport {
        &self.rpc
    }

    fn core(&self, cpu: GlobalCpuId) -> KernelResult<&CpuCore> {
        self.registry
            .cpu_slot(cpu)
            .and_then(|slot| self.cpus.get(slot))
            .ok_or(KernelError::UnknownCpu { cpu: cpu.0 })
    }

    /// Lock the scheduler of `cpu`
    pub fn scheduler(&self, cpu: GlobalCpuId) -> KernelResult<IrqSpinLockGuard<'_, CpuScheduler>> {
        Ok(self.core(cpu)?.sched.lock())
    }

    pub fn events(&self, cpu: GlobalCpuId) -> KernelResult<&EventTable> {
        Ok(&self.core(cpu)?.events)
    }

    /// Execution context of whatever `cpu` currently runs
    pub fn context(&self, cpu: GlobalCpuId) -> KernelResult<ExecContext> {
        let sched = self.scheduler(cpu)?;
        let thread = sched
            .current()
            .or(sched.idle())
            .ok_or(KernelError::Sched(crate::scheduler::SchedulerError::CpuNotAvailable { cpu: cpu.0 }))?;
        Ok(ExecContext::new(cpu, thread))
    }

    /// Placement passthrough for memory and explicit requests
    pub fn place(&self, req: &PlacementRequest) -> KernelResult<Placement> {
        Ok(self.dqdt.place(req)?)
    }

    // ─── Thread creation ───────────────────────────────────────

    /// Create a thread wherever the DQDT finds room
    pub fn thread_create(&self, ctx: &ExecContext, kind: ThreadType) -> KernelResult<(ThreadId, GlobalCpuId)> {
        self.spawn(ctx, kind, PlacementKind::ThreadCreate)
    }

    /// First thread of a forked task
    pub fn task_fork(&self, ctx: &ExecContext) -> KernelResult<(ThreadId, GlobalCpuId)> {
        self.spawn(ctx, ThreadType::User, PlacementKind::TaskFork)
    }

    fn spawn(&self, ctx: &ExecContext, kind: ThreadType, how: PlacementKind) -> KernelResult<(ThreadId, GlobalCpuId)> {
        if !matches!(kind, ThreadType::User | ThreadType::Kernel) {
            return Err(KernelError::Reserved { thread_id: 0 });
        }
        let placement = self.dqdt.place(&PlacementRequest::new(how, ctx.cpu.cluster()))?;
        let thread = Thread::new(kind, placement.cpu);

        match self.insert_new(ctx, thread) {
            Ok(tid) => {
                log::debug!("kernel: {} created {} on {}", ctx.cpu, tid, placement.cpu);
                Ok((tid, placement.cpu))
            }
            Err(err) => {
                // Give back the slot the placement reserved
                self.dqdt.account_departure(placement.cpu)?;
                if err.should_log() {
                    log::error!("kernel: creating a thread on {} failed: {}", placement.cpu, err);
                }
                Err(err)
            }
        }
    }

    fn insert_new(&self, ctx: &ExecContext, thread: Thread) -> KernelResult<ThreadId> {
        let target = thread.cpu();
        if target.cluster() == ctx.cpu.cluster() {
            let tid = self.scheduler(target)?.enqueue(thread)?;
            return Ok(tid);
        }
        let answer = self
            .rpc
            .call::<ThreadCreateRemote>(ctx, RpcTarget::Cpu(target), &thread)?;
        answer.unwrap_or(Err(KernelError::NoResponse))
    }

    /// Kernel thread pinned to `cpu`
    pub fn kthread_create(&self, cpu: GlobalCpuId) -> KernelResult<ThreadId> {
        let tid = self.scheduler(cpu)?.enqueue(Thread::kernel(cpu))?;
        self.dqdt.account_arrival(cpu)?;
        Ok(tid)
    }

    // ─── Sleep / wakeup ────────────────────────────────────────

    /// Wake `tid`, which lives on `cpu`.
    ///
    /// Same CPU: direct. Same cluster: event slot, applied at the target's
    /// next tick. Other cluster: Lazy RPC posting that event remotely.
    pub fn wakeup(&self, ctx: &ExecContext, tid: ThreadId, cpu: GlobalCpuId) -> KernelResult<()> {
        if cpu == ctx.cpu {
            let core = self.core(cpu)?;
            let mut managers = core.managers.lock();
            if core.sched.lock().wakeup(tid)? {
                managers.resumed(tid);
            }
        } else if cpu.cluster() == ctx.cpu.cluster() {
            self.events(cpu)?.post(SchedEvent::Wakeup(tid))?;
        } else {
            self.rpc.call::<RemoteWakeup>(ctx, RpcTarget::Cpu(cpu), &tid)?;
        }
        Ok(())
    }

    /// Block `ctx.thread`; any listener token it held is given up
    pub fn sleep(&self, ctx: &ExecContext) -> KernelResult<()> {
        let core = self.core(ctx.cpu)?;
        let is_manager = {
            let mut managers = core.managers.lock();
            let is_manager = managers.is_manager(ctx.thread);
            if is_manager {
                managers.blocked(ctx.thread);
            }
            is_manager
        };
        core.sched.lock().sleep(ctx.thread)?;

        if self.rpc.relinquish(ctx.cpu, ctx.thread) || (is_manager && self.rpc.has_work(ctx.cpu)) {
            self.rpc_interrupt(ctx.cpu)?;
        }
        Ok(())
    }

    pub fn yield_now(&self, cpu: GlobalCpuId, forced: bool) -> KernelResult<()> {
        Ok(self.scheduler(cpu)?.yield_now(forced)?)
    }

    /// Apply the events other CPUs posted for `cpu`
    pub fn drain_events(&self, cpu: GlobalCpuId) -> KernelResult<usize> {
        let core = self.core(cpu)?;
        let events = core.events.drain();
        let mut managers = core.managers.lock();
        let mut sched = core.sched.lock();
        for &event in &events {
            sched.apply_event(event);
            // A manager blocked in a handler takes its pool slot back
            if let SchedEvent::Wakeup(tid) = event {
                if sched.thread(tid).map_or(false, |t| t.state() != ThreadState::Waiting) {
                    managers.resumed(tid);
                }
            }
        }
        Ok(events.len())
    }

    /// Pick what `cpu` runs next
    pub fn schedule(&self, cpu: GlobalCpuId) -> KernelResult<Option<ThreadId>> {
        self.drain_events(cpu)?;
        Ok(self.scheduler(cpu)?.elect())
    }

    // ─── Clock ─────────────────────────────────────────────────

    /// Timer tick of `cpu`.
    ///
    /// Returns the thread a balancing pass marked for export, if any. The
    /// first CPU of each cluster also drives that cluster's DQDT updates.
    pub fn clock(&self, cpu: GlobalCpuId) -> KernelResult<Option<Export>> {
        let core = self.core(cpu)?;
        self.drain_events(cpu)?;
        let export = {
            let mut sched = core.sched.lock();
            let export = sched.clock(&*self.dqdt);
            if let Some(desc) = self.registry.cpu(cpu) {
                desc.set_usage(sched.usage(), sched.busy_percent());
            }
            export
        };

        if cpu.local() == CpuId(0) {
            self.dqdt_tick(cpu.cluster())?;
        }
        if self.rpc.has_work(cpu) {
            self.rpc_interrupt(cpu)?;
        }
        Ok(export)
    }

    /// Count one tick for `cluster`; every update period refresh its leaf
    /// and whatever ancestors are due. Returns the round, if one ran.
    pub fn dqdt_tick(&self, cluster: ClusterId) -> KernelResult<Option<u64>> {
        let ticks = self
            .cluster_ticks
            .get(cluster.index())
            .ok_or(KernelError::Dqdt(crate::dqdt::DqdtError::InvalidCluster { cluster: cluster.0 }))?;
        let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let period = self.config.dqdt_update_period.max(1) as u64;
        if tick % period != 0 {
            return Ok(None);
        }
        let round = tick / period;
        self.dqdt.tick(cluster, round)?;
        Ok(Some(round))
    }

    // ─── Migration ─────────────────────────────────────────────

    /// The running thread enters the kernel
    pub fn enter_kernel(&self, cpu: GlobalCpuId) -> KernelResult<()> {
        if let Some(desc) = self.registry.cpu(cpu) {
            desc.set_in_kernel(true);
        }
        Ok(self.scheduler(cpu)?.enter_kernel()?)
    }

    /// The running thread goes back to user mode.
    ///
    /// A thread marked for migration leaves here; returns where it went.
    pub fn return_to_user(&self, ctx: &ExecContext) -> KernelResult<Option<GlobalCpuId>> {
        let handoff = {
            let mut sched = self.scheduler(ctx.cpu)?;
            match sched.return_to_user()? {
                Some(target) => {
                    let tid = sched.current().ok_or(KernelError::Reserved { thread_id: ctx.thread.0 })?;
                    Some(sched.migrate_out(tid, target)?)
                }
                None => None,
            }
        };
        let moved = match handoff {
            Some(handoff) => self.hand_over(ctx, handoff)?,
            None => None,
        };
        if let Some(desc) = self.registry.cpu(ctx.cpu) {
            desc.set_in_kernel(false);
        }
        Ok(moved)
    }

    /// Move `tid` from `ctx.cpu` to `target` right now
    pub fn migrate(&self, ctx: &ExecContext, tid: ThreadId, target: GlobalCpuId) -> KernelResult<()> {
        self.core(target)?;
        self.dqdt.account_arrival(target)?;
        let handoff = self.scheduler(ctx.cpu)?.migrate_out(tid, target);
        let handoff = match handoff {
            Ok(handoff) => handoff,
            Err(err) => {
                self.dqdt.account_departure(target)?;
                return Err(err.into());
            }
        };
        // The explicit target supersedes whatever a balancing pass reserved
        if let Some(stale) = handoff.reserved {
            self.dqdt.account_departure(stale)?;
        }
        match self.hand_over(ctx, handoff)? {
            Some(_) => Ok(()),
            None => Err(KernelError::Sched(crate::scheduler::SchedulerError::CpuNotAvailable { cpu: target.0 })),
        }
    }

    /// Keep `tid` on `cpu` after all; its reserved destination is released.
    ///
    /// Returns false when the thread was not marked.
    pub fn cancel_migration(&self, cpu: GlobalCpuId, tid: ThreadId) -> KernelResult<bool> {
        let target = self.scheduler(cpu)?.cancel_migration(tid)?;
        match target {
            Some(target) => {
                self.dqdt.account_departure(target)?;
                log::debug!("kernel: {} stays on {}, {} released", tid, cpu, target);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Insert a handed-off thread at its destination.
    ///
    /// The destination already counts the thread (placement or explicit
    /// reservation); on success the source stops counting it. On failure
    /// the thread goes back where it came from and the reservation is
    /// released.
    fn hand_over(&self, ctx: &ExecContext, handoff: Handoff) -> KernelResult<Option<GlobalCpuId>> {
        let (from, to, tid) = (handoff.from, handoff.to, handoff.thread.id());
        let inserted = if to.cluster() == from.cluster() {
            self.scheduler(to)?.import(handoff.clone()).map_err(KernelError::from)
        } else {
            self.rpc
                .call::<ThreadImport>(ctx, RpcTarget::Cpu(to), &handoff)
                .map_err(KernelError::from)
                .and_then(|answer| answer.unwrap_or(Err(KernelError::NoResponse)))
        };

        match inserted {
            Ok(_) => {
                self.dqdt.account_departure(from)?;
                log::debug!("kernel: {} migrated {} -> {}", tid, from, to);
                Ok(Some(to))
            }
            Err(err) => {
                log::warn!("kernel: migrating {} to {} failed: {}", tid, to, err);
                self.dqdt.account_departure(to)?;
                let back = Handoff { to: from, ..handoff };
                self.scheduler(from)?.import(back)?;
                Ok(None)
            }
        }
    }

    /// Remove `tid` from `cpu` for good
    pub fn thread_exit(&self, cpu: GlobalCpuId, tid: ThreadId) -> KernelResult<()> {
        let core = self.core(cpu)?;
        if core.managers.lock().is_manager(tid) {
            return Err(KernelError::Reserved { thread_id: tid.0 });
        }
        let dead = {
            let mut sched = core.sched.lock();
            if sched.idle() == Some(tid) {
                return Err(KernelError::Reserved { thread_id: tid.0 });
            }
            sched.exit(tid)?
        };

        // A pending migration had reserved room at its destination
        if let Some(target) = dead.migrate_to() {
            self.dqdt.account_departure(target)?;
        }
        self.dqdt.account_departure(cpu)?;
        Ok(())
    }

    // ─── RPC service ───────────────────────────────────────────

    /// IPI (or stranded work) on `cpu`: make sure a manager will drain
    pub fn rpc_interrupt(&self, cpu: GlobalCpuId) -> KernelResult<ManagerAction> {
        let core = self.core(cpu)?;
        let mut managers = core.managers.lock();
        let action = managers.activate();
        match action {
            ManagerAction::Wake(tid) => {
                core.sched.lock().wakeup(tid)?;
            }
            ManagerAction::Spawn => {
                let tid = core.sched.lock().enqueue(Thread::kernel(cpu))?;
                managers.spawned(tid);
                log::debug!("rpc: {} spawned manager {}", cpu, tid);
            }
            ManagerAction::Saturated => {
                log::warn!("rpc: {} manager pool exhausted", cpu);
            }
            ManagerAction::AlreadyActive => {}
        }
        Ok(action)
    }

    /// Body of an RPC manager thread: drain, then park once idle.
    ///
    /// Returns the number of requests served.
    pub fn run_rpc_manager(&self, ctx: &ExecContext) -> KernelResult<usize> {
        let core = self.core(ctx.cpu)?;
        let mut served = 0;
        loop {
            served += self.rpc.serve_local(ctx);
            if !self.rpc.has_work(ctx.cpu) {
                break;
            }
            // Someone else holds the token; it will see the rest
            if self.holds_no_token(ctx) {
                break;
            }
        }

        let mut managers = core.managers.lock();
        managers.park(ctx.thread);
        let mut sched = core.sched.lock();
        if sched.current() == Some(ctx.thread) {
            sched.sleep(ctx.thread)?;
        }
        Ok(served)
    }

    fn holds_no_token(&self, ctx: &ExecContext) -> bool {
        [RpcTarget::Cpu(ctx.cpu), RpcTarget::Cluster(ctx.cpu.cluster())]
            .into_iter()
            .filter_map(|t| self.rpc.listener(t))
            .all(|l| l.drainer().map_or(false, |d| d != ctx.thread))
    }

    /// RPC managers created on `cpu`
    pub fn rpc_managers(&self, cpu: GlobalCpuId) -> KernelResult<usize> {
        Ok(self.core(cpu)?.managers.lock().created())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SharedMemoryFabric;
    use crate::boot::boot;
    use crate::cluster::Topology;
    use crate::memory::BuddyAllocator;
    use crate::scheduler::ThreadFlags;

    fn kernel() -> Arc<Kernel> {
        boot(
            Topology::mesh(2, 2, 2),
            KernelConfig::default(),
            Arc::new(SharedMemoryFabric::new()),
            Arc::new(BuddyAllocator::new(4, 64)),
        )
        .unwrap()
    }

    fn cpu(cluster: u16, lid: u8) -> GlobalCpuId {
        GlobalCpuId::new(ClusterId(cluster), CpuId(lid))
    }

    fn leaf_threads(k: &Kernel, cluster: u16) -> u32 {
        let leaf = k.dqdt().leaf(ClusterId(cluster)).unwrap();
        k.dqdt().snapshot(leaf).indicators.threads
    }

    #[test]
    fn test_create_and_exit_keep_counts() {
        let k = kernel();
        let ctx = k.context(cpu(0, 0)).unwrap();
        let (tid, on) = k.thread_create(&ctx, ThreadType::User).unwrap();
        assert_eq!(on, cpu(0, 0));
        assert!(k.scheduler(on).unwrap().thread(tid).is_some());
        assert_eq!(leaf_threads(&k, 0), 1);
        assert_eq!(k.registry().cpu(on).unwrap().threads(), 1);

        k.thread_exit(on, tid).unwrap();
        assert_eq!(leaf_threads(&k, 0), 0);
        assert_eq!(k.registry().cpu(on).unwrap().threads(), 0);
        assert_eq!(
            k.thread_exit(on, tid),
            Err(KernelError::Sched(crate::scheduler::SchedulerError::ThreadNotFound { thread_id: tid.0 }))
        );
    }

    #[test]
    fn test_wakeup_within_cluster_goes_through_events() {
        let k = kernel();
        let sleeper_cpu = cpu(0, 1);
        let tid = k.kthread_create(sleeper_cpu).unwrap();
        assert_eq!(k.schedule(sleeper_cpu).unwrap(), Some(tid));
        k.sleep(&ExecContext::new(sleeper_cpu, tid)).unwrap();
        assert_eq!(k.scheduler(sleeper_cpu).unwrap().thread(tid).unwrap().state(), ThreadState::Waiting);

        let waker = k.context(cpu(0, 0)).unwrap();
        k.wakeup(&waker, tid, sleeper_cpu).unwrap();
        // Nothing changes until the target looks at its events
        assert_eq!(k.scheduler(sleeper_cpu).unwrap().thread(tid).unwrap().state(), ThreadState::Waiting);
        assert_eq!(k.drain_events(sleeper_cpu).unwrap(), 1);
        assert_eq!(k.scheduler(sleeper_cpu).unwrap().thread(tid).unwrap().state(), ThreadState::Ready);
    }

    #[test]
    fn test_explicit_migration_inside_cluster() {
        let k = kernel();
        let ctx = k.context(cpu(1, 0)).unwrap();
        let (tid, from) = k.thread_create(&ctx, ThreadType::User).unwrap();
        assert_eq!(from, cpu(1, 0));

        k.migrate(&ctx, tid, cpu(1, 1)).unwrap();
        assert!(k.scheduler(from).unwrap().thread(tid).is_none());
        let flags = k.scheduler(cpu(1, 1)).unwrap().thread(tid).unwrap().flags();
        assert!(flags.contains(ThreadFlags::IMPORTED));
        assert!(!flags.contains(ThreadFlags::EXPORTED));
        assert_eq!(leaf_threads(&k, 1), 1);
        assert_eq!(k.registry().cpu(from).unwrap().threads(), 0);
        assert_eq!(k.registry().cpu(cpu(1, 1)).unwrap().threads(), 1);
    }

    #[test]
    fn test_marked_thread_leaves_at_return_to_user() {
        let k = kernel();
        let src = cpu(2, 0);
        let ctx = k.context(src).unwrap();
        let (tid, _) = k.thread_create(&ctx, ThreadType::User).unwrap();
        assert_eq!(k.schedule(src).unwrap(), Some(tid));

        // What a balancing pass does: reserve the target, mark the thread
        k.dqdt().account_arrival(cpu(2, 1)).unwrap();
        k.scheduler(src).unwrap().mark_for_migration(tid, cpu(2, 1)).unwrap();

        let running = ExecContext::new(src, tid);
        assert_eq!(k.return_to_user(&running).unwrap(), Some(cpu(2, 1)));
        assert!(k.scheduler(cpu(2, 1)).unwrap().thread(tid).is_some());
        assert_eq!(leaf_threads(&k, 2), 1);
        assert!(!k.registry().cpu(src).unwrap().in_kernel());
    }

    #[test]
    fn test_explicit_migration_settles_a_balancer_reservation() {
        let k = kernel();
        let src = cpu(2, 0);
        let ctx = k.context(src).unwrap();
        let (tid, _) = k.thread_create(&ctx, ThreadType::User).unwrap();

        // A balancing pass reserved room in cluster 1
        k.dqdt().account_arrival(cpu(1, 0)).unwrap();
        k.scheduler(src).unwrap().mark_for_migration(tid, cpu(1, 0)).unwrap();

        k.migrate(&ctx, tid, cpu(2, 1)).unwrap();
        assert_eq!(leaf_threads(&k, 1), 0);
        assert_eq!(leaf_threads(&k, 2), 1);
        assert_eq!(k.registry().cpu(cpu(1, 0)).unwrap().threads(), 0);

        k.thread_exit(cpu(2, 1), tid).unwrap();
        assert_eq!(leaf_threads(&k, 2), 0);
        assert_eq!(k.dqdt().snapshot(k.dqdt().root()).indicators.threads, 0);
    }

    #[test]
    fn test_marked_migration_to_its_own_target() {
        let k = kernel();
        let src = cpu(2, 0);
        let ctx = k.context(src).unwrap();
        let (tid, _) = k.thread_create(&ctx, ThreadType::User).unwrap();
        k.dqdt().account_arrival(cpu(2, 1)).unwrap();
        k.scheduler(src).unwrap().mark_for_migration(tid, cpu(2, 1)).unwrap();

        k.migrate(&ctx, tid, cpu(2, 1)).unwrap();
        k.thread_exit(cpu(2, 1), tid).unwrap();
        assert_eq!(leaf_threads(&k, 2), 0);
        assert_eq!(k.registry().cpu(cpu(2, 1)).unwrap().threads(), 0);
    }

    #[test]
    fn test_cancelled_migration_releases_the_target() {
        let k = kernel();
        let ctx = k.context(cpu(0, 0)).unwrap();
        let (tid, on) = k.thread_create(&ctx, ThreadType::User).unwrap();
        k.dqdt().account_arrival(cpu(3, 0)).unwrap();
        k.scheduler(on).unwrap().mark_for_migration(tid, cpu(3, 0)).unwrap();

        assert_eq!(k.cancel_migration(on, tid), Ok(true));
        assert_eq!(leaf_threads(&k, 3), 0);
        assert_eq!(leaf_threads(&k, 0), 1);
        assert_eq!(k.cancel_migration(on, tid), Ok(false));
        assert!(k.scheduler(on).unwrap().thread(tid).unwrap().flags().is_migratable());
    }

    #[test]
    fn test_woken_manager_stays_the_only_one() {
        let k = kernel();
        let c = cpu(3, 1);
        assert_eq!(k.rpc_interrupt(c).unwrap(), ManagerAction::Spawn);
        let manager = k.schedule(c).unwrap().unwrap();

        // Blocks inside a handler
        k.sleep(&ExecContext::new(c, manager)).unwrap();
        assert_eq!(k.thread_exit(c, manager), Err(KernelError::Reserved { thread_id: manager.0 }));

        let idle = k.scheduler(c).unwrap().idle().unwrap();
        k.wakeup(&ExecContext::new(c, idle), manager, c).unwrap();
        assert_eq!(k.rpc_interrupt(c).unwrap(), ManagerAction::AlreadyActive);
        assert_eq!(k.rpc_managers(c).unwrap(), 1);
    }

    #[test]
    fn test_manager_woken_through_an_event() {
        let k = kernel();
        let c = cpu(1, 1);
        k.rpc_interrupt(c).unwrap();
        let manager = k.schedule(c).unwrap().unwrap();
        k.sleep(&ExecContext::new(c, manager)).unwrap();

        let waker = k.context(cpu(1, 0)).unwrap();
        k.wakeup(&waker, manager, c).unwrap();
        assert_eq!(k.drain_events(c).unwrap(), 1);
        assert_eq!(k.rpc_interrupt(c).unwrap(), ManagerAction::AlreadyActive);
        assert_eq!(k.rpc_managers(c).unwrap(), 1);
    }

    #[test]
    fn test_kernel_threads_are_reserved() {
        let k = kernel();
        let c = cpu(3, 1);
        let idle = k.scheduler(c).unwrap().idle().unwrap();
        assert_eq!(k.thread_exit(c, idle), Err(KernelError::Reserved { thread_id: idle.0 }));

        assert_eq!(k.rpc_interrupt(c).unwrap(), ManagerAction::Spawn);
        assert_eq!(k.rpc_interrupt(c).unwrap(), ManagerAction::AlreadyActive);
        assert_eq!(k.rpc_managers(c).unwrap(), 1);
    }

    #[test]
    fn test_dqdt_rounds_follow_the_update_period() {
        let k = kernel();
        let rounds: Vec<_> = (0..8).map(|_| k.dqdt_tick(ClusterId(1)).unwrap()).collect();
        assert_eq!(rounds, [None, None, None, Some(1), None, None, None, Some(2)]);
        assert!(k.dqdt_tick(ClusterId(9)).is_err());
    }

    #[test]
    fn test_self_ping() {
        let k = kernel();
        let ctx = k.context(cpu(0, 0)).unwrap();
        let answer = k.rpc().call::<Ping>(&ctx, RpcTarget::Cpu(ctx.cpu), &41).unwrap();
        assert_eq!(answer, Some(42));
    }
}
