//! Per-process idle state machine

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use super::events::TrackerEvent;
use crate::domain::types::CycleSnapshot;
use crate::domain::types::ProcessIdleView;
use crate::domain::types::ProcessKey;
use crate::domain::types::RawProcessSample;

pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_CYCLES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long a key may be missing from the input before it is forgotten
    pub stale_timeout: Duration,
    /// Number of initial observations during which a process is never idle
    pub grace_cycles: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            grace_cycles: DEFAULT_GRACE_CYCLES,
        }
    }
}

/// Cross-cycle memory for one [`ProcessKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessState {
    pub first_seen_at: Instant,
    pub last_seen_at: Instant,
    pub last_active_at: Instant,
    /// Number of cycles this key has been observed in
    pub observations: u32,
    // Some while idle; the start of the current streak
    idle_since: Option<Instant>,
}

impl ProcessState {
    fn new(now: Instant) -> Self {
        Self {
            first_seen_at: now,
            last_seen_at: now,
            last_active_at: now,
            observations: 0,
            idle_since: None,
        }
    }

    pub const fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    pub const fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }

    /// Zero unless idle. Saturates if `now` precedes the streak start.
    pub fn idle_duration(&self, now: Instant) -> Duration {
        self.idle_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    fn record(
        &mut self,
        key: ProcessKey,
        sample: &RawProcessSample,
        now: Instant,
        grace_cycles: u32,
    ) -> Option<TrackerEvent> {
        self.observations = self.observations.saturating_add(1);
        self.last_seen_at = now;
        if sample.utilization > 0 {
            self.last_active_at = now;
        }

        if self.observations <= grace_cycles {
            return None;
        }

        if sample.utilization > 0 {
            let since = self.idle_since.take()?;
            Some(TrackerEvent::BecameActive {
                key,
                idle_for: now.saturating_duration_since(since),
            })
        } else if self.idle_since.is_none() {
            self.idle_since = Some(now);
            Some(TrackerEvent::BecameIdle {
                key,
                memory_bytes: sample.memory_bytes,
            })
        } else {
            None
        }
    }

    fn view(&self, sample: &RawProcessSample, now: Instant) -> ProcessIdleView {
        let is_idle = self.is_idle();
        ProcessIdleView {
            device: sample.device,
            pid: sample.pid,
            memory_bytes: sample.memory_bytes,
            utilization: sample.utilization,
            is_idle,
            idle_duration: self.idle_duration(now),
            idle_memory_bytes: if is_idle { sample.memory_bytes } else { 0 },
        }
    }
}

/// Result of one [`IdleTracker::observe`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// One view per key present in the cycle, in input order
    pub views: Vec<ProcessIdleView>,
    pub events: Vec<TrackerEvent>,
}

/// Classifies processes as active or idle across polling cycles.
///
/// The tracker never reads the clock: every duration is the difference of
/// two cycle timestamps, so feeding it synthetic cycles is deterministic.
#[derive(Debug, Default)]
pub struct IdleTracker {
    states: HashMap<ProcessKey, ProcessState>,
    config: TrackerConfig,
}

impl IdleTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            states: HashMap::new(),
            config,
        }
    }

    /// Number of keys currently held, including ones missing from the last cycle
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, key: &ProcessKey) -> Option<&ProcessState> {
        self.states.get(key)
    }

    /// Ingests one cycle and sweeps stale entries.
    ///
    /// A key repeated within the same batch is classified once, from its
    /// first sample.
    pub fn observe(&mut self, cycle: &CycleSnapshot) -> CycleOutcome {
        let now = cycle.timestamp;
        let grace_cycles = self.config.grace_cycles;
        let mut seen = HashSet::with_capacity(cycle.samples.len());
        let mut outcome = CycleOutcome {
            views: Vec::with_capacity(cycle.samples.len()),
            events: Vec::new(),
        };

        for sample in &cycle.samples {
            let key = sample.key();
            if !seen.insert(key) {
                continue;
            }

            let state = match self.states.entry(key) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    outcome.events.push(TrackerEvent::Discovered {
                        key,
                        memory_bytes: sample.memory_bytes,
                    });
                    entry.insert(ProcessState::new(now))
                }
            };
            if let Some(event) = state.record(key, sample, now, grace_cycles) {
                outcome.events.push(event);
            }
            outcome.views.push(state.view(sample, now));
        }

        self.sweep(now, &seen, &mut outcome.events);
        outcome
    }

    fn sweep(&mut self, now: Instant, seen: &HashSet<ProcessKey>, events: &mut Vec<TrackerEvent>) {
        let stale_timeout = self.config.stale_timeout;
        let mut evicted = Vec::new();

        self.states.retain(|key, state| {
            if seen.contains(key) {
                return true;
            }
            let unseen_for = now.saturating_duration_since(state.last_seen_at);
            if unseen_for > stale_timeout {
                evicted.push(TrackerEvent::Evicted {
                    key: *key,
                    unseen_for,
                });
                false
            } else {
                true
            }
        });

        evicted.sort_by_key(TrackerEvent::key);
        events.extend(evicted);
    }
}
