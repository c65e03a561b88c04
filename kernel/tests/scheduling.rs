//! Scheduling and migration scenarios over a booted kernel
//!
//! Cross-cluster operations block their caller until the remote side
//! serves its listeners, so the remote CPU is played by a scoped host
//! thread looping on `serve_local`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use almos_kernel::arch::SharedMemoryFabric;
use almos_kernel::cluster::{ClusterId, CpuId, GlobalCpuId, Topology};
use almos_kernel::memory::BuddyAllocator;
use almos_kernel::scheduler::{CpuScheduler, ExecContext, Thread, ThreadFlags, ThreadId, ThreadState, ThreadType};
use almos_kernel::{boot, Kernel, KernelConfig};

fn cpu(cluster: u16, lid: u8) -> GlobalCpuId {
    GlobalCpuId::new(ClusterId(cluster), CpuId(lid))
}

fn kernel() -> Arc<Kernel> {
    boot(
        Topology::mesh(2, 2, 2),
        KernelConfig::default(),
        Arc::new(SharedMemoryFabric::new()),
        Arc::new(BuddyAllocator::new(4, 64)),
    )
    .unwrap()
}

fn leaf_threads(k: &Kernel, cluster: u16) -> u32 {
    let leaf = k.dqdt().leaf(ClusterId(cluster)).unwrap();
    k.dqdt().snapshot(leaf).indicators.threads
}

/// Serve `target`'s listeners until `stop` is raised
fn serve_until(k: &Kernel, target: GlobalCpuId, stop: &AtomicBool) {
    let ctx = ExecContext::new(target, ThreadId(u32::MAX - target.0 as u32));
    while !stop.load(Ordering::Acquire) {
        if k.rpc().serve_local(&ctx) == 0 {
            thread::yield_now();
        }
    }
}

#[test]
fn migration_to_another_cluster_conserves_threads() {
    let k = kernel();
    let target = cpu(3, 0);

    // Two threads placed by the DQDT, two inserted by hand
    let ctx = k.context(cpu(0, 0)).unwrap();
    let mut owned = Vec::new();
    for _ in 0..2 {
        owned.push(k.thread_create(&ctx, ThreadType::User).unwrap());
    }
    for _ in 0..2 {
        let tid = k.scheduler(cpu(0, 0)).unwrap().enqueue(Thread::user(cpu(0, 0))).unwrap();
        k.dqdt().account_arrival(cpu(0, 0)).unwrap();
        owned.push((tid, cpu(0, 0)));
    }
    assert!(owned.iter().all(|(_, on)| on.cluster() == ClusterId(0)));
    assert_eq!(leaf_threads(&k, 0), 4);

    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| serve_until(&k, target, &stop));
        for &(tid, from) in &owned {
            let ctx = k.context(from).unwrap();
            k.migrate(&ctx, tid, target).unwrap();
        }
        stop.store(true, Ordering::Release);
    });

    let mut seen = HashSet::new();
    for c in k.registry().cpus() {
        let sched = k.scheduler(c.gid()).unwrap();
        for &(tid, _) in &owned {
            if sched.thread(tid).is_some() {
                assert!(seen.insert(tid), "{} found twice", tid);
            }
        }
    }
    assert_eq!(seen.len(), 4);

    let sched = k.scheduler(target).unwrap();
    assert_eq!(sched.stats().imports, 4);
    for &(tid, _) in &owned {
        let flags = sched.thread(tid).unwrap().flags();
        assert!(flags.contains(ThreadFlags::IMPORTED));
        assert!(!flags.contains(ThreadFlags::EXPORTED));
    }
    drop(sched);

    assert_eq!(leaf_threads(&k, 0), 0);
    assert_eq!(leaf_threads(&k, 3), 4);
    assert_eq!(k.registry().cpu(target).unwrap().threads(), 4);
    assert_eq!(k.registry().cpu(cpu(0, 0)).unwrap().threads(), 0);
}

#[test]
fn creation_spills_over_rpc_when_the_cluster_is_full() {
    let k = kernel();
    let ctx = k.context(cpu(0, 0)).unwrap();
    k.thread_create(&ctx, ThreadType::User).unwrap();
    k.thread_create(&ctx, ThreadType::User).unwrap();

    let stop = AtomicBool::new(false);
    let (tid, on) = thread::scope(|s| {
        s.spawn(|| serve_until(&k, cpu(1, 0), &stop));
        let created = k.thread_create(&ctx, ThreadType::User).unwrap();
        stop.store(true, Ordering::Release);
        created
    });

    assert_eq!(on, cpu(1, 0));
    assert_eq!(k.scheduler(on).unwrap().thread(tid).unwrap().state(), ThreadState::Create);
    assert_eq!(leaf_threads(&k, 0), 2);
    assert_eq!(leaf_threads(&k, 1), 1);
    assert_eq!(k.rpc().stats().sent, 1);
}

#[test]
fn remote_wakeup_is_applied_by_the_owner() {
    let k = kernel();
    let sleeper_cpu = cpu(3, 1);
    let tid = k.kthread_create(sleeper_cpu).unwrap();
    assert_eq!(k.schedule(sleeper_cpu).unwrap(), Some(tid));
    k.sleep(&ExecContext::new(sleeper_cpu, tid)).unwrap();

    // Lazy call: queued, no answer awaited
    let waker = k.context(cpu(0, 0)).unwrap();
    k.wakeup(&waker, tid, sleeper_cpu).unwrap();
    assert_eq!(k.scheduler(sleeper_cpu).unwrap().thread(tid).unwrap().state(), ThreadState::Waiting);
    assert_eq!(k.rpc().stats().lazy_sent, 1);

    let server = ExecContext::new(sleeper_cpu, ThreadId(u32::MAX));
    assert_eq!(k.rpc().serve_local(&server), 1);
    assert_eq!(k.drain_events(sleeper_cpu).unwrap(), 1);
    assert_eq!(k.scheduler(sleeper_cpu).unwrap().thread(tid).unwrap().state(), ThreadState::Ready);
}

#[test]
fn balancing_pass_sends_a_thread_to_another_cluster() {
    let k = kernel();
    let src = cpu(0, 0);
    for _ in 0..2 {
        k.scheduler(src).unwrap().enqueue(Thread::user(src)).unwrap();
        k.dqdt().account_arrival(src).unwrap();
    }
    k.schedule(src).unwrap();

    // Busy ticks push usage past the high water mark by the third pass
    let export = (0..64)
        .find_map(|_| match k.clock(src).unwrap() {
            Some(export) => Some(export),
            None => {
                if k.scheduler(src).unwrap().need_resched() {
                    k.schedule(src).unwrap();
                }
                None
            }
        })
        .expect("loaded cpu never exported");
    let target = export.target;
    assert_ne!(target.cluster(), ClusterId(0));
    assert_eq!(leaf_threads(&k, 0), 2);
    assert_eq!(leaf_threads(&k, target.cluster().0), 1);
    assert_eq!(k.dqdt().snapshot(k.dqdt().root()).indicators.threads, 3);

    // The marked thread runs next and leaves on its way back to user mode
    assert_eq!(k.schedule(src).unwrap(), Some(export.thread));
    let stop = AtomicBool::new(false);
    let moved = thread::scope(|s| {
        s.spawn(|| serve_until(&k, target, &stop));
        let moved = k.return_to_user(&ExecContext::new(src, export.thread)).unwrap();
        stop.store(true, Ordering::Release);
        moved
    });

    assert_eq!(moved, Some(target));
    assert_eq!(leaf_threads(&k, 0), 1);
    assert_eq!(leaf_threads(&k, target.cluster().0), 1);
    assert_eq!(k.dqdt().snapshot(k.dqdt().root()).indicators.threads, 2);
    assert!(k.scheduler(src).unwrap().thread(export.thread).is_none());
    let flags = k.scheduler(target).unwrap().thread(export.thread).unwrap().flags();
    assert!(flags.contains(ThreadFlags::IMPORTED));
    assert_eq!(k.registry().cpu(src).unwrap().threads(), 1);
    assert_eq!(k.registry().cpu(target).unwrap().threads(), 1);
}

proptest! {
    /// Plain round robin: any N consecutive elections among N runnable
    /// user threads run every one of them
    #[test]
    fn every_window_runs_every_thread(n in 1usize..12, rounds in 2usize..6) {
        let gid = cpu(0, 0);
        let mut sched = CpuScheduler::new(gid, KernelConfig::default());
        sched.register_idle(Thread::new(ThreadType::Idle, gid)).unwrap();
        let threads: HashSet<ThreadId> = (0..n)
            .map(|_| sched.enqueue(Thread::user(gid)).unwrap())
            .collect();

        let elected: Vec<ThreadId> = (0..n * rounds).filter_map(|_| sched.elect()).collect();
        prop_assert_eq!(elected.len(), n * rounds);
        for window in elected.windows(n) {
            let seen: HashSet<ThreadId> = window.iter().copied().collect();
            prop_assert_eq!(&seen, &threads);
        }
    }
}
