//! Idle-state tracking engine
//!
//! Pure, clock-free logic: the sample merger turns two differently shaped
//! hardware readings into per-process samples, and the idle tracker classifies
//! those samples across polling cycles.

pub mod idle;
pub mod merge;
pub mod types;

pub use idle::CycleOutcome;
pub use idle::IdleTracker;
pub use idle::ProcessState;
pub use idle::TrackerConfig;
pub use idle::TrackerEvent;
pub use idle::DEFAULT_GRACE_CYCLES;
pub use idle::DEFAULT_STALE_TIMEOUT;
pub use merge::HighWaterMark;
pub use merge::MemoryHolder;
pub use merge::SampleMerger;
pub use merge::UtilizationSample;
pub use types::*;
