use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Device;
use nvml_wrapper::Nvml;

use super::DeviceInfo;
use super::GpuError;
use super::GpuSource;
use super::UtilizationWindow;
use crate::domain::DeviceIndex;
use crate::domain::MemoryHolder;
use crate::domain::UtilizationSample;

/// [`GpuSource`] backed by NVML
#[derive(Clone)]
pub struct NvmlSource {
    nvml: Arc<Nvml>,
}

impl NvmlSource {
    pub fn new(nvml: Arc<Nvml>) -> Self {
        Self { nvml }
    }

    fn device(&self, index: DeviceIndex) -> Result<Device<'_>, Report<GpuError>> {
        self.nvml
            .device_by_index(index)
            .change_context(GpuError::DeviceQuery {
                index,
                call: "device_by_index",
            })
    }
}

impl GpuSource for NvmlSource {
    fn device_count(&self) -> Result<u32, Report<GpuError>> {
        self.nvml.device_count().change_context(GpuError::DeviceCount)
    }

    fn device_info(&self, index: DeviceIndex) -> Result<DeviceInfo, Report<GpuError>> {
        let device = self.device(index)?;
        let mut info = DeviceInfo {
            index,
            ..DeviceInfo::default()
        };

        if let Ok(name) = device.name() {
            info.name = name;
        }
        if let Ok(uuid) = device.uuid() {
            info.uuid = uuid;
        }
        if let Ok(memory) = device.memory_info() {
            info.memory_used = memory.used;
            info.memory_total = memory.total;
        }
        if let Ok(rates) = device.utilization_rates() {
            info.utilization = rates.gpu;
        }
        // milliwatts
        if let Ok(power) = device.power_usage() {
            info.power_watts = f64::from(power) / 1000.0;
        }
        if let Ok(temperature) = device.temperature(TemperatureSensor::Gpu) {
            info.temperature_celsius = temperature;
        }

        Ok(info)
    }

    fn running_processes(&self, index: DeviceIndex) -> Result<Vec<MemoryHolder>, Report<GpuError>> {
        let processes = self
            .device(index)?
            .running_compute_processes()
            .change_context(GpuError::DeviceQuery {
                index,
                call: "running_compute_processes",
            })?;

        Ok(processes
            .into_iter()
            .map(|process| memory_holder(index, process.pid, process.used_gpu_memory))
            .collect())
    }

    fn utilization_samples(
        &self,
        index: DeviceIndex,
        since: u64,
    ) -> Result<UtilizationWindow, Report<GpuError>> {
        match self.device(index)?.process_utilization_stats(since) {
            Ok(samples) => Ok(UtilizationWindow::Samples(
                samples
                    .into_iter()
                    .map(|sample| UtilizationSample {
                        pid: sample.pid,
                        sm_util: sample.sm_util,
                        timestamp: sample.timestamp,
                    })
                    .collect(),
            )),
            Err(NvmlError::NotFound) => Ok(UtilizationWindow::NoData),
            Err(e) => Err(Report::new(e).change_context(GpuError::DeviceQuery {
                index,
                call: "process_utilization_stats",
            })),
        }
    }
}

/// A process NVML lists as running still holds the device, even when the
/// driver cannot report how much memory (containers, vGPU, MIG).
fn memory_holder(index: DeviceIndex, pid: u32, used: UsedGpuMemory) -> MemoryHolder {
    let memory_bytes = match used {
        UsedGpuMemory::Used(bytes) => bytes,
        UsedGpuMemory::Unavailable => {
            tracing::debug!(gpu = index, pid, "GPU memory usage unavailable, reporting 0");
            0
        }
    };
    MemoryHolder { pid, memory_bytes }
}
