//! One polling pass over every GPU: device readings plus merged per-process samples

use std::time::Instant;

use error_stack::Report;

use crate::domain::CycleSnapshot;
use crate::domain::DeviceIndex;
use crate::domain::RawProcessSample;
use crate::domain::SampleMerger;
use crate::infrastructure::gpu::DeviceInfo;
use crate::infrastructure::gpu::GpuError;
use crate::infrastructure::gpu::GpuSource;

/// Result of a single collection pass
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub devices: Vec<DeviceInfo>,
    pub cycle: CycleSnapshot,
}

#[derive(Debug)]
pub struct Collector<S> {
    source: S,
    merger: SampleMerger,
}

impl<S: GpuSource> Collector<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            merger: SampleMerger::new(),
        }
    }

    pub fn merger(&self) -> &SampleMerger {
        &self.merger
    }

    /// Queries every device. A device that fails to answer contributes
    /// nothing this cycle; only a failure to enumerate devices is an error.
    pub fn collect(&mut self, timestamp: Instant) -> Result<Snapshot, Report<GpuError>> {
        let count = self.source.device_count()?;
        let mut devices = Vec::with_capacity(count as usize);
        let mut samples = Vec::new();

        for index in 0..count {
            match self.source.device_info(index) {
                Ok(info) => devices.push(info),
                Err(report) => {
                    tracing::warn!(gpu = index, "Skipping GPU this cycle: {report:?}");
                    continue;
                }
            }

            match self.collect_processes(index) {
                Ok(processes) => samples.extend(processes),
                Err(report) => {
                    tracing::warn!(gpu = index, "No process samples this cycle: {report:?}");
                }
            }
        }

        Ok(Snapshot {
            devices,
            cycle: CycleSnapshot::new(timestamp, samples),
        })
    }

    fn collect_processes(
        &mut self,
        index: DeviceIndex,
    ) -> Result<Vec<RawProcessSample>, Report<GpuError>> {
        let holders = self.source.running_processes(index)?;
        if holders.is_empty() {
            return Ok(Vec::new());
        }

        let since = self.merger.window_start(index);
        let samples = self.source.utilization_samples(index, since)?.into_samples();

        Ok(self.merger.merge(index, &holders, &samples))
    }
}
