//! Run queues of one CPU
//!
//! Three FIFO lists serviced in a fixed order:
//! - `kthreads`: kernel work, always first
//! - `migrate`:  threads marked to leave, so they reach their exit point soon
//! - `runnable`: user threads, round-robin

use alloc::collections::VecDeque;

use crate::scheduler::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Kernel,
    Migrate,
    Runnable,
}

impl QueueKind {
    /// Election order
    pub const ORDER: [QueueKind; 3] = [QueueKind::Kernel, QueueKind::Migrate, QueueKind::Runnable];
}

#[derive(Debug, Default)]
pub struct RunQueue {
    kthreads: VecDeque<ThreadId>,
    migrate: VecDeque<ThreadId>,
    runnable: VecDeque<ThreadId>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, kind: QueueKind) -> &VecDeque<ThreadId> {
        match kind {
            QueueKind::Kernel => &self.kthreads,
            QueueKind::Migrate => &self.migrate,
            QueueKind::Runnable => &self.runnable,
        }
    }

    fn list_mut(&mut self, kind: QueueKind) -> &mut VecDeque<ThreadId> {
        match kind {
            QueueKind::Kernel => &mut self.kthreads,
            QueueKind::Migrate => &mut self.migrate,
            QueueKind::Runnable => &mut self.runnable,
        }
    }

    pub fn push_back(&mut self, kind: QueueKind, tid: ThreadId) {
        self.list_mut(kind).push_back(tid);
    }

    pub fn push_front(&mut self, kind: QueueKind, tid: ThreadId) {
        self.list_mut(kind).push_front(tid);
    }

    /// Next thread in election order
    pub fn pop(&mut self) -> Option<(QueueKind, ThreadId)> {
        QueueKind::ORDER
            .into_iter()
            .find_map(|kind| self.list_mut(kind).pop_front().map(|tid| (kind, tid)))
    }

    /// Remove `tid` wherever it is queued
    pub fn remove(&mut self, tid: ThreadId) -> Option<QueueKind> {
        for kind in QueueKind::ORDER {
            let list = self.list_mut(kind);
            if let Some(pos) = list.iter().position(|&t| t == tid) {
                list.remove(pos);
                return Some(kind);
            }
        }
        None
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        QueueKind::ORDER.iter().any(|&k| self.list(k).contains(&tid))
    }

    pub fn iter(&self, kind: QueueKind) -> impl Iterator<Item = ThreadId> + '_ {
        self.list(kind).iter().copied()
    }

    pub fn len_of(&self, kind: QueueKind) -> usize {
        self.list(kind).len()
    }

    pub fn len(&self) -> usize {
        QueueKind::ORDER.iter().map(|&k| self.list(k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
