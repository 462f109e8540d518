use std::time::Duration;

use crate::domain::types::ProcessKey;

/// State transitions observed during one cycle, in the order they happened.
///
/// The tracker never logs; callers decide what to do with these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// First observation of a key (or first after eviction)
    Discovered { key: ProcessKey, memory_bytes: u64 },
    /// Active -> idle
    BecameIdle { key: ProcessKey, memory_bytes: u64 },
    /// Idle -> active, with the length of the finished idle streak
    BecameActive { key: ProcessKey, idle_for: Duration },
    /// Dropped by the staleness sweep
    Evicted { key: ProcessKey, unseen_for: Duration },
}

impl TrackerEvent {
    pub const fn key(&self) -> ProcessKey {
        match self {
            Self::Discovered { key, .. }
            | Self::BecameIdle { key, .. }
            | Self::BecameActive { key, .. }
            | Self::Evicted { key, .. } => *key,
        }
    }
}
