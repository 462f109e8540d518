use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::IdleTracker;
use crate::domain::Pid;
use crate::domain::ProcessIdleView;
use crate::domain::TrackerEvent;
use crate::infrastructure::collector::Collector;
use crate::infrastructure::gpu::DeviceInfo;
use crate::infrastructure::gpu::GpuSource;
use crate::infrastructure::process_names::ProcessNames;
use crate::infrastructure::process_names::UNKNOWN_PROCESS;

const MIB: u64 = 1024 * 1024;

/// An idle view with its resolved process name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedProcessView {
    pub name: String,
    pub view: ProcessIdleView,
}

/// Everything produced by one polling cycle. Immutable once published.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: Instant,
    pub devices: Vec<DeviceInfo>,
    pub processes: Vec<NamedProcessView>,
}

impl CycleReport {
    pub fn empty(timestamp: Instant) -> Self {
        Self {
            timestamp,
            devices: Vec::new(),
            processes: Vec::new(),
        }
    }
}

struct ObserverState<S> {
    collector: Collector<S>,
    tracker: IdleTracker,
}

/// Drives collection and idle classification once per tick and publishes
/// the resulting [`CycleReport`] to subscribers.
pub struct IdleObserver<S> {
    // only the polling task locks this
    state: Mutex<ObserverState<S>>,
    names: ProcessNames,
    publisher: watch::Sender<Arc<CycleReport>>,
}

impl<S: GpuSource> IdleObserver<S> {
    pub fn create(collector: Collector<S>, tracker: IdleTracker, names: ProcessNames) -> Arc<Self> {
        let (publisher, _) = watch::channel(Arc::new(CycleReport::empty(Instant::now())));
        Arc::new(Self {
            state: Mutex::new(ObserverState { collector, tracker }),
            names,
            publisher,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CycleReport>> {
        self.publisher.subscribe()
    }

    /// Most recently published report
    pub fn latest(&self) -> Arc<CycleReport> {
        self.publisher.borrow().clone()
    }

    /// Run the polling loop until cancelled. The first cycle runs immediately.
    pub async fn run(&self, poll_interval: Duration, cancellation_token: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("Idle observer shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once(Instant::now());
                }
            }
        }
    }

    /// One collect -> classify -> publish pass. Returns `None` when the
    /// cycle had to be skipped.
    pub fn poll_once(&self, now: Instant) -> Option<Arc<CycleReport>> {
        let (devices, outcome) = {
            let mut state = self.state.lock().expect("poisoned");
            let snapshot = match state.collector.collect(now) {
                Ok(snapshot) => snapshot,
                Err(report) => {
                    tracing::warn!("GPU collection failed, skipping cycle: {report:?}");
                    return None;
                }
            };
            let outcome = state.tracker.observe(&snapshot.cycle);
            (snapshot.devices, outcome)
        };

        let names = self
            .names
            .resolve_all(outcome.views.iter().map(|view| view.pid));
        log_events(&outcome.events, &names);

        let processes = outcome
            .views
            .into_iter()
            .map(|view| NamedProcessView {
                name: names
                    .get(&view.pid)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PROCESS.to_string()),
                view,
            })
            .collect();

        let report = Arc::new(CycleReport {
            timestamp: now,
            devices,
            processes,
        });
        self.publisher.send_replace(report.clone());
        Some(report)
    }
}

fn log_events(events: &[TrackerEvent], names: &HashMap<Pid, String>) {
    let name_of = |pid: Pid| names.get(&pid).map(String::as_str).unwrap_or("-");

    for event in events {
        match *event {
            TrackerEvent::Discovered { key, memory_bytes } => tracing::info!(
                gpu = key.device,
                pid = key.pid,
                name = name_of(key.pid),
                memory_mib = memory_bytes / MIB,
                "New GPU process detected"
            ),
            TrackerEvent::BecameIdle { key, memory_bytes } => tracing::info!(
                gpu = key.device,
                pid = key.pid,
                name = name_of(key.pid),
                memory_mib = memory_bytes / MIB,
                "Process became idle"
            ),
            TrackerEvent::BecameActive { key, idle_for } => tracing::info!(
                gpu = key.device,
                pid = key.pid,
                name = name_of(key.pid),
                idle_secs = idle_for.as_secs(),
                "Process became active"
            ),
            TrackerEvent::Evicted { key, unseen_for } => tracing::info!(
                gpu = key.device,
                pid = key.pid,
                unseen_secs = unseen_for.as_secs(),
                "Cleaning up stale process"
            ),
        }
    }
}
