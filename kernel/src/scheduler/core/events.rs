//! Cross-CPU event table
//!
//! A CPU never touches another CPU's run queues. Wakeups aimed at a thread
//! owned by another CPU of the cluster are posted here instead and applied
//! by the owner at its next clock tick.
//!
//! Each slot is one `AtomicU64`: 0 means free, anything else is an encoded
//! event. Posting claims a free slot with CAS; draining swaps slots back
//! to 0.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use super::error::{SchedulerError, SchedulerResult};
use crate::cluster::GlobalCpuId;
use crate::config::EVENT_SLOTS;
use crate::scheduler::thread::ThreadId;

const KIND_SHIFT: u32 = 32;
const KIND_WAKEUP: u64 = 1;
const KIND_RESCHEDULE: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedEvent {
    /// Make a waiting thread ready
    Wakeup(ThreadId),
    /// Ask for an election at the next opportunity
    Reschedule,
}

impl SchedEvent {
    fn encode(self) -> u64 {
        match self {
            Self::Wakeup(tid) => (KIND_WAKEUP << KIND_SHIFT) | tid.0 as u64,
            Self::Reschedule => KIND_RESCHEDULE << KIND_SHIFT,
        }
    }

    fn decode(raw: u64) -> Option<Self> {
        match raw >> KIND_SHIFT {
            KIND_WAKEUP => Some(Self::Wakeup(ThreadId(raw as u32))),
            KIND_RESCHEDULE => Some(Self::Reschedule),
            _ => None,
        }
    }
}

pub struct EventTable {
    cpu: GlobalCpuId,
    slots: [AtomicU64; EVENT_SLOTS],
}

impl EventTable {
    pub fn new(cpu: GlobalCpuId) -> Self {
        Self {
            cpu,
            slots: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Post an event from any CPU
    pub fn post(&self, event: SchedEvent) -> SchedulerResult<()> {
        let raw = event.encode();
        for slot in &self.slots {
            if slot
                .compare_exchange(0, raw, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(SchedulerError::EventTableFull { cpu: self.cpu.0 })
    }

    /// Take every posted event (owner CPU only)
    pub fn drain(&self) -> Vec<SchedEvent> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.swap(0, Ordering::AcqRel) {
                0 => None,
                raw => SchedEvent::decode(raw),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.load(Ordering::Acquire) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_drain() {
        let table = EventTable::new(GlobalCpuId(1));
        table.post(SchedEvent::Wakeup(ThreadId(17))).unwrap();
        table.post(SchedEvent::Reschedule).unwrap();
        let events = table.drain();
        assert_eq!(events, [SchedEvent::Wakeup(ThreadId(17)), SchedEvent::Reschedule]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_full_table() {
        let table = EventTable::new(GlobalCpuId(2));
        for i in 0..EVENT_SLOTS as u32 {
            table.post(SchedEvent::Wakeup(ThreadId(i + 1))).unwrap();
        }
        assert_eq!(
            table.post(SchedEvent::Reschedule),
            Err(SchedulerError::EventTableFull { cpu: 2 })
        );
        assert_eq!(table.drain().len(), EVENT_SLOTS);
        assert!(table.post(SchedEvent::Reschedule).is_ok());
    }
}
