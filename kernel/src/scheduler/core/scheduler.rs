//! Per-CPU round-robin scheduler
//!
//! One `CpuScheduler` per CPU, owned by that CPU and protected by an
//! IRQ-disabling spinlock. It decides which thread runs next; saving and
//! restoring register context is the architecture port's business.
//!
//! ## Election order
//! kthreads -> migrate -> runnable, FIFO inside each list. The previous
//! thread goes back to the tail of its list, or to the head when it was
//! forced to yield.
//!
//! ## Clock
//! The tick only marks the running thread for rescheduling when its
//! quantum is spent; the switch itself happens at the next election. Once
//! per balancing period the usage average is refreshed and a balancing
//! pass runs.

use alloc::vec::Vec;
use core::hash::BuildHasherDefault;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use super::error::{SchedulerError, SchedulerResult};
use super::events::SchedEvent;
use super::loadbalancer::{is_eligible, select_victim, Export, LoadOracle};
use super::runqueue::{QueueKind, RunQueue};
use super::statistics::SchedulerStats;
use crate::cluster::GlobalCpuId;
use crate::config::{KernelConfig, CPU_MAX_THREADS};
use crate::scheduler::thread::{Thread, ThreadFlags, ThreadId, ThreadState, ThreadType};

type ThreadIndex = HashMap<ThreadId, usize, BuildHasherDefault<SipHasher13>>;

/// A thread in transit between two CPUs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub thread: Thread,
    pub from: GlobalCpuId,
    pub to: GlobalCpuId,
    /// Destination a balancing mark had reserved for the thread. Stays on
    /// the source CPU; whoever moves the thread settles it.
    #[serde(skip)]
    pub reserved: Option<GlobalCpuId>,
}

pub struct CpuScheduler {
    cpu: GlobalCpuId,
    config: KernelConfig,
    /// Fixed thread table, `CPU_MAX_THREADS` slots
    slots: Vec<Option<Thread>>,
    index: ThreadIndex,
    queues: RunQueue,
    current: Option<ThreadId>,
    idle: Option<ThreadId>,
    need_resched: bool,
    period_ticks: u32,
    period_busy: u32,
    usage: u8,
    busy_percent: u8,
    stats: SchedulerStats,
}

impl CpuScheduler {
    pub fn new(cpu: GlobalCpuId, config: KernelConfig) -> Self {
        Self {
            cpu,
            config,
            slots: (0..CPU_MAX_THREADS).map(|_| None).collect(),
            index: HashMap::with_hasher(Default::default()),
            queues: RunQueue::new(),
            current: None,
            idle: None,
            need_resched: false,
            period_ticks: 0,
            period_busy: 0,
            usage: 0,
            busy_percent: 0,
            stats: SchedulerStats::new(),
        }
    }

    pub fn cpu(&self) -> GlobalCpuId {
        self.cpu
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn idle(&self) -> Option<ThreadId> {
        self.idle
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched
    }

    /// Decayed usage average (0-100)
    pub fn usage(&self) -> u8 {
        self.usage
    }

    /// Busy share of the last complete period (0-100)
    pub fn busy_percent(&self) -> u8 {
        self.busy_percent
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.slots.get(*self.index.get(&tid)?)?.as_ref()
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().flatten()
    }

    /// Threads owned by this CPU, idle excluded
    pub fn thread_count(&self) -> usize {
        self.index.len() - self.idle.map_or(0, |_| 1)
    }

    pub fn queued(&self, kind: QueueKind) -> impl Iterator<Item = ThreadId> + '_ {
        self.queues.iter(kind)
    }

    pub fn has_runnable(&self) -> bool {
        !self.queues.is_empty()
    }

    fn thread_mut(&mut self, tid: ThreadId) -> SchedulerResult<&mut Thread> {
        let slot = *self
            .index
            .get(&tid)
            .ok_or(SchedulerError::ThreadNotFound { thread_id: tid.0 })?;
        self.slots[slot]
            .as_mut()
            .ok_or(SchedulerError::InternalError { thread_id: tid.0 })
    }

    fn transition(&mut self, tid: ThreadId, to: ThreadState) -> SchedulerResult<()> {
        let thread = self.thread_mut(tid)?;
        if !thread.state.can_transition(to, thread.kind()) {
            return Err(SchedulerError::InvalidStateTransition {
                thread_id: tid.0,
                from: thread.state,
                to,
            });
        }
        thread.state = to;
        Ok(())
    }

    /// Put `thread` in the local table without queueing it
    pub fn register(&mut self, mut thread: Thread) -> SchedulerResult<ThreadId> {
        let tid = thread.id();
        if self.index.contains_key(&tid) {
            return Err(SchedulerError::ThreadAlreadyExists { thread_id: tid.0 });
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SchedulerError::ThreadTableFull {
                cpu: self.cpu.0,
                max: CPU_MAX_THREADS,
            })?;
        thread.cpu = self.cpu;
        self.slots[slot] = Some(thread);
        self.index.insert(tid, slot);
        Ok(tid)
    }

    /// Register the idle thread, elected when every list is empty
    pub fn register_idle(&mut self, thread: Thread) -> SchedulerResult<ThreadId> {
        if thread.kind() != ThreadType::Idle {
            return Err(SchedulerError::InvalidStateTransition {
                thread_id: thread.id().0,
                from: thread.state(),
                to: ThreadState::RunningKernel,
            });
        }
        let tid = self.register(thread)?;
        self.idle = Some(tid);
        Ok(tid)
    }

    fn queue_of(thread: &Thread) -> QueueKind {
        if thread.flags.contains(ThreadFlags::NEED_TO_MIGRATE) {
            QueueKind::Migrate
        } else if thread.kind().is_kernel() {
            QueueKind::Kernel
        } else {
            QueueKind::Runnable
        }
    }

    fn insert(&mut self, tid: ThreadId, front: bool) {
        let kind = match self.thread(tid) {
            Some(thread) => Self::queue_of(thread),
            None => return,
        };
        if front {
            self.queues.push_front(kind, tid);
        } else {
            self.queues.push_back(kind, tid);
        }
        // The idle thread gives way as soon as there is real work
        if self.current.is_some() && self.current == self.idle {
            self.need_resched = true;
        }
    }

    /// Register and queue a new (or handed over) thread
    pub fn enqueue(&mut self, thread: Thread) -> SchedulerResult<ThreadId> {
        if !thread.state().is_schedulable() {
            return Err(SchedulerError::InvalidStateTransition {
                thread_id: thread.id().0,
                from: thread.state(),
                to: ThreadState::Ready,
            });
        }
        let tid = self.register(thread)?;
        self.insert(tid, false);
        log::trace!("sched: {} enqueued {}", self.cpu, tid);
        Ok(tid)
    }

    /// Make a waiting thread runnable; false if it already was
    pub fn wakeup(&mut self, tid: ThreadId) -> SchedulerResult<bool> {
        match self.thread_mut(tid)?.state {
            ThreadState::Waiting => {}
            ThreadState::Dead => {
                return Err(SchedulerError::InvalidStateTransition {
                    thread_id: tid.0,
                    from: ThreadState::Dead,
                    to: ThreadState::Ready,
                })
            }
            _ => return Ok(false),
        }
        self.transition(tid, ThreadState::Ready)?;
        self.insert(tid, false);
        self.stats.wakeups += 1;
        Ok(true)
    }

    /// Block the running thread until `wakeup`
    pub fn sleep(&mut self, tid: ThreadId) -> SchedulerResult<()> {
        if self.current != Some(tid) {
            return Err(SchedulerError::NotCurrent { thread_id: tid.0 });
        }
        self.transition(tid, ThreadState::Waiting)?;
        self.need_resched = true;
        Ok(())
    }

    /// Remove `tid` for good; returns the dead descriptor
    pub fn exit(&mut self, tid: ThreadId) -> SchedulerResult<Thread> {
        self.transition(tid, ThreadState::Dead)?;
        self.queues.remove(tid);
        if self.current == Some(tid) {
            self.current = None;
            self.need_resched = true;
        }
        if self.idle == Some(tid) {
            self.idle = None;
        }
        let thread = self.detach(tid)?;
        log::trace!("sched: {} exit {}", self.cpu, tid);
        Ok(thread)
    }

    fn detach(&mut self, tid: ThreadId) -> SchedulerResult<Thread> {
        let slot = self
            .index
            .remove(&tid)
            .ok_or(SchedulerError::ThreadNotFound { thread_id: tid.0 })?;
        self.slots[slot]
            .take()
            .ok_or(SchedulerError::InternalError { thread_id: tid.0 })
    }

    /// Give the CPU up at the next election; a forced yield keeps the
    /// thread at the head of its list
    pub fn yield_now(&mut self, forced: bool) -> SchedulerResult<()> {
        let tid = self.current.ok_or(SchedulerError::NotCurrent { thread_id: 0 })?;
        if forced {
            self.thread_mut(tid)?.flags.insert(ThreadFlags::FORCED_YIELD);
        }
        self.need_resched = true;
        Ok(())
    }

    /// Pick the next thread to run
    pub fn elect(&mut self) -> Option<ThreadId> {
        self.stats.elections += 1;
        let prev = self.current.take();

        if let Some(prev) = prev {
            let is_idle = Some(prev) == self.idle;
            let requeue = match self.thread_mut(prev) {
                Ok(thread) if thread.state.is_running() => {
                    thread.state = ThreadState::Ready;
                    let forced = thread.flags.contains(ThreadFlags::FORCED_YIELD);
                    thread.flags.remove(ThreadFlags::FORCED_YIELD);
                    (!is_idle).then_some(forced)
                }
                _ => None,
            };
            if let Some(front) = requeue {
                self.insert(prev, front);
            }
        }

        self.need_resched = false;
        let next = match self.queues.pop() {
            Some((_, tid)) => tid,
            None => self.idle?,
        };

        let quantum = self.config.quantum_ticks;
        let thread = match self.thread_mut(next) {
            Ok(thread) => thread,
            Err(err) => {
                log::error!("sched: {} queued unknown {}: {}", self.cpu, next, err);
                return None;
            }
        };
        let to = match (thread.state, thread.kind()) {
            (ThreadState::Create, ThreadType::User) => ThreadState::RunningUser,
            _ => ThreadState::RunningKernel,
        };
        kernel_assert!(
            thread.state.can_transition(to, thread.kind()),
            "{} elected in state {}",
            next,
            thread.state
        );
        thread.state = to;
        thread.quantum = quantum;

        self.current = Some(next);
        if prev != Some(next) {
            self.stats.switches += 1;
        }
        log::trace!("sched: {} elect {}", self.cpu, next);
        Some(next)
    }

    /// Apply an event posted by another CPU
    pub fn apply_event(&mut self, event: SchedEvent) {
        match event {
            SchedEvent::Wakeup(tid) => {
                if let Err(err) = self.wakeup(tid) {
                    crate::sched_error!(err);
                }
            }
            SchedEvent::Reschedule => self.need_resched = true,
        }
    }

    /// Timer tick
    pub fn clock(&mut self, oracle: &dyn LoadOracle) -> Option<Export> {
        self.stats.ticks += 1;
        self.period_ticks += 1;

        match self.current.filter(|&c| Some(c) != self.idle) {
            Some(tid) => {
                self.period_busy += 1;
                self.stats.busy_ticks += 1;
                if let Ok(thread) = self.thread_mut(tid) {
                    thread.ticks += 1;
                    thread.boosted_prio = thread.boosted_prio.saturating_add(1);
                    thread.quantum = thread.quantum.saturating_sub(1);
                    if thread.quantum == 0 {
                        self.need_resched = true;
                    }
                }
            }
            None => {
                if !self.queues.is_empty() {
                    self.need_resched = true;
                }
            }
        }

        if self.period_ticks < self.config.effective_balance_period() {
            return None;
        }
        self.busy_percent = (self.period_busy * 100 / self.period_ticks) as u8;
        self.usage = ((self.usage as u16 + self.busy_percent as u16) / 2) as u8;
        self.period_ticks = 0;
        self.period_busy = 0;
        self.balance(oracle)
    }

    /// User threads that could run here right now
    fn runnable_users(&self) -> usize {
        let queued = self
            .queues
            .iter(QueueKind::Runnable)
            .filter(|&t| self.thread(t).map_or(false, |t| t.kind() == ThreadType::User))
            .count();
        let running = self
            .current
            .and_then(|t| self.thread(t))
            .map_or(0, |t| (t.kind() == ThreadType::User && t.state.is_running()) as usize);
        queued + running
    }

    fn balance(&mut self, oracle: &dyn LoadOracle) -> Option<Export> {
        self.stats.balance_passes += 1;

        let parent = oracle.parent_usage(self.cpu.cluster());
        let victim = if is_eligible(self.usage, self.runnable_users(), parent, &self.config) {
            select_victim(self.queues.iter(QueueKind::Runnable).filter_map(|t| self.thread(t)))
        } else {
            None
        };

        // Stale load decays whether or not anyone was picked
        for thread in self.slots.iter_mut().flatten() {
            thread.boosted_prio /= 2;
        }

        let victim = victim?;
        let target = oracle.migration_target(self.cpu)?;
        if let Err(err) = self.mark_for_migration(victim, target) {
            crate::sched_error!(err);
            return None;
        }
        self.stats.exports += 1;
        log::debug!(
            "sched: {} usage {} parent {:?}: exporting {} to {}",
            self.cpu,
            self.usage,
            parent,
            victim,
            target
        );
        Some(Export { thread: victim, target })
    }

    /// Flag `tid` to leave for `target` at its next user/kernel boundary
    pub fn mark_for_migration(&mut self, tid: ThreadId, target: GlobalCpuId) -> SchedulerResult<()> {
        let thread = self.thread_mut(tid)?;
        if !thread.flags.is_migratable() {
            return Err(SchedulerError::MigrationNotAllowed { thread_id: tid.0 });
        }
        thread.flags.insert(ThreadFlags::EXPORTED | ThreadFlags::NEED_TO_MIGRATE);
        thread.migrate_to = Some(target);
        if self.queues.remove(tid).is_some() {
            self.queues.push_back(QueueKind::Migrate, tid);
        }
        Ok(())
    }

    /// Drop a pending migration mark; returns the target it had reserved
    pub fn cancel_migration(&mut self, tid: ThreadId) -> SchedulerResult<Option<GlobalCpuId>> {
        let thread = self.thread_mut(tid)?;
        if !thread.flags.contains(ThreadFlags::NEED_TO_MIGRATE) {
            return Ok(None);
        }
        thread.flags.remove(ThreadFlags::EXPORTED | ThreadFlags::NEED_TO_MIGRATE);
        let target = thread.migrate_to.take();
        if self.queues.remove(tid).is_some() {
            self.insert(tid, false);
        }
        Ok(target)
    }

    /// Allow or forbid the context transfer of `tid` (critical sections)
    pub fn set_migration_capable(&mut self, tid: ThreadId, capable: bool) -> SchedulerResult<()> {
        let thread = self.thread_mut(tid)?;
        thread.flags.set(ThreadFlags::CAP_MIGRATE, capable);
        Ok(())
    }

    /// Running thread enters the kernel (syscall, fault, interrupt)
    pub fn enter_kernel(&mut self) -> SchedulerResult<()> {
        let tid = self.current.ok_or(SchedulerError::NotCurrent { thread_id: 0 })?;
        if self.thread_mut(tid)?.state == ThreadState::RunningUser {
            self.transition(tid, ThreadState::RunningKernel)?;
        }
        Ok(())
    }

    /// Running thread goes back to user mode.
    ///
    /// Returns the destination when the thread is marked for migration and
    /// its context may be transferred now; the caller then hands it off.
    pub fn return_to_user(&mut self) -> SchedulerResult<Option<GlobalCpuId>> {
        let tid = self.current.ok_or(SchedulerError::NotCurrent { thread_id: 0 })?;
        if self.thread_mut(tid)?.state == ThreadState::RunningKernel {
            self.transition(tid, ThreadState::RunningUser)?;
        }
        let thread = self.thread_mut(tid)?;
        let leave = ThreadFlags::NEED_TO_MIGRATE | ThreadFlags::CAP_MIGRATE;
        if thread.flags.contains(leave) {
            return Ok(thread.migrate_to);
        }
        Ok(None)
    }

    /// Remove `tid` from this CPU for insertion on `target`.
    ///
    /// The thread must be allowed to migrate and must not have been handed
    /// off already; a thread the balancer marked is the exception to the
    /// second rule.
    pub fn migrate_out(&mut self, tid: ThreadId, target: GlobalCpuId) -> SchedulerResult<Handoff> {
        let thread = self.thread(tid).ok_or(SchedulerError::ThreadNotFound { thread_id: tid.0 })?;
        let flags = thread.flags();
        if !flags.contains(ThreadFlags::CAN_MIGRATE)
            || (flags.contains(ThreadFlags::EXPORTED) && !flags.contains(ThreadFlags::NEED_TO_MIGRATE))
            || matches!(thread.state(), ThreadState::Waiting | ThreadState::Dead)
        {
            return Err(SchedulerError::MigrationNotAllowed { thread_id: tid.0 });
        }

        self.queues.remove(tid);
        if self.current == Some(tid) {
            self.current = None;
            self.need_resched = true;
        }
        let mut thread = self.detach(tid)?;
        if thread.state.is_running() {
            thread.state = ThreadState::Ready;
        }
        thread.flags.insert(ThreadFlags::EXPORTED);
        thread.flags.remove(ThreadFlags::NEED_TO_MIGRATE | ThreadFlags::IMPORTED);
        let reserved = thread.migrate_to.take();

        log::debug!("sched: {} hands {} off to {}", self.cpu, tid, target);
        Ok(Handoff {
            thread,
            from: self.cpu,
            to: target,
            reserved,
        })
    }

    /// Insert a thread handed off by another CPU
    pub fn import(&mut self, handoff: Handoff) -> SchedulerResult<ThreadId> {
        let mut thread = handoff.thread;
        kernel_assert!(
            thread.flags.contains(ThreadFlags::EXPORTED),
            "{} imported on {} without being exported",
            thread.id(),
            self.cpu
        );
        if self.index.len() >= CPU_MAX_THREADS {
            return Err(SchedulerError::ThreadTableFull {
                cpu: self.cpu.0,
                max: CPU_MAX_THREADS,
            });
        }
        thread.flags.remove(ThreadFlags::EXPORTED);
        if handoff.from != self.cpu {
            thread.flags.insert(ThreadFlags::IMPORTED);
            self.stats.imports += 1;
        }
        if thread.state != ThreadState::Create {
            thread.state = ThreadState::Ready;
        }
        let tid = self.register(thread)?;
        self.insert(tid, false);
        log::debug!("sched: {} imported {} from {}", self.cpu, tid, handoff.from);
        Ok(tid)
    }
}
