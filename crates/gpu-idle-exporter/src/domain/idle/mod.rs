mod events;
mod tracker;

pub use events::TrackerEvent;
pub use tracker::CycleOutcome;
pub use tracker::IdleTracker;
pub use tracker::ProcessState;
pub use tracker::TrackerConfig;
pub use tracker::DEFAULT_GRACE_CYCLES;
pub use tracker::DEFAULT_STALE_TIMEOUT;
