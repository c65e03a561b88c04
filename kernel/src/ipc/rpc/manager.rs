//! RPC manager pool
//!
//! Each CPU keeps a small pool of kernel threads dedicated to draining its
//! listeners. At most one is active; the others sleep on the idle list
//! until an IPI asks for service while the active one is blocked. A
//! blocked manager that wakes up takes the active slot back if it is
//! still free.

use alloc::vec::Vec;

use crate::config::RPC_MANAGERS_MAX;
use crate::scheduler::ThreadId;

/// What the interrupt path must do to get the listener drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerAction {
    /// A manager is already running, nothing to do
    AlreadyActive,
    /// Wake this idle manager
    Wake(ThreadId),
    /// Create a new manager thread
    Spawn,
    /// Pool exhausted; the current holder will get to it
    Saturated,
}

#[derive(Debug, Default)]
pub struct RpcManager {
    active: Option<ThreadId>,
    idle: Vec<ThreadId>,
    /// Managers asleep inside a handler
    blocked: Vec<ThreadId>,
    created: usize,
}

impl RpcManager {
    pub const fn new() -> Self {
        Self {
            active: None,
            idle: Vec::new(),
            blocked: Vec::new(),
            created: 0,
        }
    }

    /// Decide how to get a manager running
    pub fn activate(&mut self) -> ManagerAction {
        if self.active.is_some() {
            return ManagerAction::AlreadyActive;
        }
        if let Some(tid) = self.idle.pop() {
            self.active = Some(tid);
            return ManagerAction::Wake(tid);
        }
        if self.created < RPC_MANAGERS_MAX {
            ManagerAction::Spawn
        } else {
            ManagerAction::Saturated
        }
    }

    /// Record a freshly created manager as the active one
    pub fn spawned(&mut self, tid: ThreadId) {
        self.created += 1;
        self.active = Some(tid);
    }

    /// Active manager found nothing left to do
    pub fn park(&mut self, tid: ThreadId) {
        if self.active == Some(tid) {
            self.active = None;
        }
        self.blocked.retain(|&t| t != tid);
        if !self.idle.contains(&tid) {
            self.idle.push(tid);
        }
    }

    /// Active manager blocked inside a handler
    pub fn blocked(&mut self, tid: ThreadId) {
        if self.active == Some(tid) {
            self.active = None;
            self.blocked.push(tid);
        }
    }

    /// `tid` was woken up; false if it is not a blocked manager.
    ///
    /// When another manager took over meanwhile, the resumed one finishes
    /// its handler as a spare and parks.
    pub fn resumed(&mut self, tid: ThreadId) -> bool {
        let Some(pos) = self.blocked.iter().position(|&t| t == tid) else {
            return false;
        };
        self.blocked.swap_remove(pos);
        if self.active.is_none() {
            self.active = Some(tid);
        } else if !self.idle.contains(&tid) {
            self.idle.push(tid);
        }
        true
    }

    pub fn active(&self) -> Option<ThreadId> {
        self.active
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn is_manager(&self, tid: ThreadId) -> bool {
        self.active == Some(tid) || self.idle.contains(&tid) || self.blocked.contains(&tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_lifecycle() {
        let mut pool = RpcManager::new();
        assert_eq!(pool.activate(), ManagerAction::Spawn);
        pool.spawned(ThreadId(10));
        assert_eq!(pool.activate(), ManagerAction::AlreadyActive);

        pool.park(ThreadId(10));
        assert_eq!(pool.active(), None);
        assert_eq!(pool.activate(), ManagerAction::Wake(ThreadId(10)));
        assert_eq!(pool.active(), Some(ThreadId(10)));
    }

    #[test]
    fn test_pool_is_bounded() {
        let mut pool = RpcManager::new();
        for i in 0..RPC_MANAGERS_MAX as u32 {
            assert_eq!(pool.activate(), ManagerAction::Spawn);
            pool.spawned(ThreadId(100 + i));
            pool.blocked(ThreadId(100 + i));
        }
        assert_eq!(pool.activate(), ManagerAction::Saturated);
        assert_eq!(pool.created(), RPC_MANAGERS_MAX);
    }

    #[test]
    fn test_resumed_manager_takes_its_slot_back() {
        let mut pool = RpcManager::new();
        assert_eq!(pool.activate(), ManagerAction::Spawn);
        pool.spawned(ThreadId(10));
        pool.blocked(ThreadId(10));
        assert!(pool.is_manager(ThreadId(10)));
        assert!(!pool.resumed(ThreadId(99)));

        assert!(pool.resumed(ThreadId(10)));
        assert_eq!(pool.active(), Some(ThreadId(10)));
        assert_eq!(pool.activate(), ManagerAction::AlreadyActive);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_resumed_after_takeover_becomes_spare() {
        let mut pool = RpcManager::new();
        pool.activate();
        pool.spawned(ThreadId(10));
        pool.blocked(ThreadId(10));
        assert_eq!(pool.activate(), ManagerAction::Spawn);
        pool.spawned(ThreadId(11));

        assert!(pool.resumed(ThreadId(10)));
        assert_eq!(pool.active(), Some(ThreadId(11)));
        assert!(pool.is_manager(ThreadId(10)));
        pool.park(ThreadId(11));
        assert_eq!(pool.activate(), ManagerAction::Wake(ThreadId(11)));
    }
}
