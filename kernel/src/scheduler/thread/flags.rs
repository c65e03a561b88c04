//! Thread flags

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Migration and scheduling flags of a thread
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ThreadFlags: u32 {
        /// Thread may be moved to another CPU
        const CAN_MIGRATE     = 1 << 0;
        /// Marked by the balancer, leaves at its next user/kernel boundary
        const NEED_TO_MIGRATE = 1 << 1;
        /// Handed off (or about to be), not owned by the local CPU anymore
        const EXPORTED        = 1 << 2;
        /// Arrived through a migration
        const IMPORTED        = 1 << 3;
        /// Re-inserted at the head of its list on the next election
        const FORCED_YIELD    = 1 << 4;
        /// Context may be transferred right now (not in a critical section)
        const CAP_MIGRATE     = 1 << 5;
    }
}

impl ThreadFlags {
    /// Default flags of a user thread
    pub const USER_DEFAULT: Self = Self::CAN_MIGRATE.union(Self::CAP_MIGRATE);

    /// Candidate for victim selection
    #[inline]
    pub fn is_migratable(self) -> bool {
        self.contains(Self::CAN_MIGRATE) && !self.contains(Self::EXPORTED)
    }
}
