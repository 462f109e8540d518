pub mod collector;
pub mod gpu;
pub mod idle_observer;
pub mod logging;
pub mod metrics;
pub mod process_names;

pub use collector::Collector;
pub use idle_observer::CycleReport;
pub use idle_observer::IdleObserver;
pub use idle_observer::NamedProcessView;
pub use process_names::ProcessNames;
