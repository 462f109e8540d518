//! Merges the memory-holder list and the windowed utilization samples of a
//! device into one [`RawProcessSample`] per memory holder.

use std::collections::HashMap;

use super::types::DeviceIndex;
use super::types::Pid;
use super::types::RawProcessSample;

/// Utilization readings above this are garbage reported by the driver.
pub const MAX_UTILIZATION: u32 = 100;

/// Latest utilization sample timestamp already consumed for a device.
///
/// Only ever moves forward; see [`HighWaterMark::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct HighWaterMark(u64);

impl HighWaterMark {
    pub const fn new(timestamp: u64) -> Self {
        Self(timestamp)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Moves the mark to `candidate` if it is newer. Returns whether it moved.
    pub fn advance(&mut self, candidate: u64) -> bool {
        if candidate > self.0 {
            self.0 = candidate;
            true
        } else {
            false
        }
    }
}

/// A process currently holding device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHolder {
    pub pid: Pid,
    pub memory_bytes: u64,
}

/// A compute utilization sample, timestamp in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilizationSample {
    pub pid: Pid,
    pub sm_util: u32,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
pub struct SampleMerger {
    marks: HashMap<DeviceIndex, HighWaterMark>,
}

impl SampleMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, device: DeviceIndex) -> HighWaterMark {
        self.marks.get(&device).copied().unwrap_or_default()
    }

    /// Timestamp to pass to the utilization query for `device`.
    pub fn window_start(&self, device: DeviceIndex) -> u64 {
        self.mark(device).get()
    }

    /// Merges one device's readings.
    ///
    /// Utilization is the peak seen in the window, not the average: the only
    /// question is whether the process did any compute work. Processes that
    /// produced samples but hold no memory are dropped.
    pub fn merge(
        &mut self,
        device: DeviceIndex,
        holders: &[MemoryHolder],
        samples: &[UtilizationSample],
    ) -> Vec<RawProcessSample> {
        let mark = self.marks.entry(device).or_default();
        let window_start = mark.get();

        let mut peak: HashMap<Pid, u32> = HashMap::with_capacity(samples.len());
        for sample in samples {
            if sample.timestamp < window_start {
                continue;
            }
            mark.advance(sample.timestamp);

            if sample.sm_util > MAX_UTILIZATION {
                tracing::debug!(
                    gpu = device,
                    pid = sample.pid,
                    sm_util = sample.sm_util,
                    "Ignoring out of range utilization sample"
                );
                continue;
            }
            let entry = peak.entry(sample.pid).or_insert(0);
            *entry = (*entry).max(sample.sm_util);
        }

        holders
            .iter()
            .map(|holder| RawProcessSample {
                device,
                pid: holder.pid,
                memory_bytes: holder.memory_bytes,
                utilization: peak.get(&holder.pid).copied().unwrap_or(0),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const GIB: u64 = 1 << 30;

    fn holder(pid: Pid, memory_bytes: u64) -> MemoryHolder {
        MemoryHolder { pid, memory_bytes }
    }

    fn sample(pid: Pid, sm_util: u32, timestamp: u64) -> UtilizationSample {
        UtilizationSample {
            pid,
            sm_util,
            timestamp,
        }
    }

    #[test]
    fn mark_never_moves_backwards() {
        let mut mark = HighWaterMark::new(100);
        assert!(!mark.advance(50));
        assert!(!mark.advance(100));
        assert_eq!(mark.get(), 100);
        assert!(mark.advance(150));
        assert_eq!(mark.get(), 150);
    }

    #[test]
    fn takes_peak_utilization_per_pid() {
        let mut merger = SampleMerger::new();
        let merged = merger.merge(
            0,
            &[holder(10, GIB)],
            &[sample(10, 5, 1), sample(10, 70, 2), sample(10, 20, 3)],
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].utilization, 70);
        assert_eq!(merged[0].memory_bytes, GIB);
    }

    #[test]
    fn holders_without_samples_default_to_zero() {
        let mut merger = SampleMerger::new();
        let merged = merger.merge(
            1,
            &[holder(10, GIB), holder(20, 2 * GIB)],
            &[sample(10, 40, 7)],
        );

        assert_eq!(
            merged,
            vec![
                RawProcessSample {
                    device: 1,
                    pid: 10,
                    memory_bytes: GIB,
                    utilization: 40,
                },
                RawProcessSample {
                    device: 1,
                    pid: 20,
                    memory_bytes: 2 * GIB,
                    utilization: 0,
                },
            ]
        );
    }

    #[test]
    fn samples_from_non_holders_are_dropped() {
        let mut merger = SampleMerger::new();
        let merged = merger.merge(0, &[holder(10, GIB)], &[sample(99, 100, 5)]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].pid, 10);
        assert_eq!(merged[0].utilization, 0);
        // consumed even though the pid was dropped
        assert_eq!(merger.window_start(0), 5);
    }

    #[test]
    fn advances_mark_to_newest_sample() {
        let mut merger = SampleMerger::new();
        merger.merge(0, &[holder(10, GIB)], &[sample(10, 1, 300), sample(10, 1, 200)]);

        assert_eq!(merger.window_start(0), 300);
    }

    #[test]
    fn empty_window_leaves_mark_untouched() {
        let mut merger = SampleMerger::new();
        merger.merge(0, &[holder(10, GIB)], &[sample(10, 1, 300)]);
        let merged = merger.merge(0, &[holder(10, GIB)], &[]);

        assert_eq!(merger.window_start(0), 300);
        assert_eq!(merged[0].utilization, 0);
    }

    #[test]
    fn marks_are_per_device() {
        let mut merger = SampleMerger::new();
        merger.merge(0, &[holder(10, GIB)], &[sample(10, 1, 300)]);
        merger.merge(1, &[holder(10, GIB)], &[sample(10, 1, 40)]);

        assert_eq!(merger.window_start(0), 300);
        assert_eq!(merger.window_start(1), 40);
        assert_eq!(merger.window_start(2), 0);
    }

    #[test]
    fn samples_older_than_mark_are_ignored() {
        let mut merger = SampleMerger::new();
        merger.merge(0, &[holder(10, GIB)], &[sample(10, 1, 300)]);
        let merged = merger.merge(0, &[holder(10, GIB)], &[sample(10, 90, 250)]);

        assert_eq!(merged[0].utilization, 0);
        assert_eq!(merger.window_start(0), 300);
    }

    #[test]
    fn out_of_range_utilization_is_ignored() {
        let mut merger = SampleMerger::new();
        let merged = merger.merge(
            0,
            &[holder(10, GIB)],
            &[sample(10, u32::MAX, 10), sample(10, 0, 11)],
        );

        assert_eq!(merged[0].utilization, 0);
        assert_eq!(merger.window_start(0), 11);
    }
}
