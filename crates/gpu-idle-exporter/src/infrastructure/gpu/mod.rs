//! Hardware query layer
//!
//! [`GpuSource`] is the seam between the idle tracking engine and the driver:
//! - device discovery and device level readings
//! - processes holding device memory
//! - time-windowed per-process utilization samples

use core::error::Error;
use std::sync::Arc;

use error_stack::Report;

use crate::domain::DeviceIndex;
use crate::domain::MemoryHolder;
use crate::domain::UtilizationSample;

pub mod init;
pub mod nvml;

pub use init::init_nvml;
pub use init::initialize_gpu_system;
pub use nvml::NvmlSource;

/// Device level readings. Fields that could not be read are left at zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub index: DeviceIndex,
    pub uuid: String,
    pub name: String,
    pub memory_used: u64,
    pub memory_total: u64,
    /// percent 0-100
    pub utilization: u32,
    pub power_watts: f64,
    pub temperature_celsius: u32,
}

/// Outcome of a windowed utilization query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtilizationWindow {
    Samples(Vec<UtilizationSample>),
    /// Nothing was recorded since the requested timestamp. Not an error:
    /// every process on the device was idle during the window.
    NoData,
}

impl UtilizationWindow {
    pub fn into_samples(self) -> Vec<UtilizationSample> {
        match self {
            Self::Samples(samples) => samples,
            Self::NoData => Vec::new(),
        }
    }
}

/// Errors raised by the hardware query layer
#[derive(Debug, derive_more::Display)]
pub enum GpuError {
    #[display("Failed to count GPU devices")]
    DeviceCount,
    #[display("Failed to query GPU {index}: {call}")]
    DeviceQuery { index: DeviceIndex, call: &'static str },
}

impl Error for GpuError {}

pub trait GpuSource: Send + Sync {
    fn device_count(&self) -> Result<u32, Report<GpuError>>;

    fn device_info(&self, index: DeviceIndex) -> Result<DeviceInfo, Report<GpuError>>;

    /// Processes currently holding memory on the device
    fn running_processes(&self, index: DeviceIndex) -> Result<Vec<MemoryHolder>, Report<GpuError>>;

    /// Utilization samples recorded after `since` (microseconds)
    fn utilization_samples(
        &self,
        index: DeviceIndex,
        since: u64,
    ) -> Result<UtilizationWindow, Report<GpuError>>;
}

impl<T: GpuSource + ?Sized> GpuSource for Arc<T> {
    fn device_count(&self) -> Result<u32, Report<GpuError>> {
        (**self).device_count()
    }

    fn device_info(&self, index: DeviceIndex) -> Result<DeviceInfo, Report<GpuError>> {
        (**self).device_info(index)
    }

    fn running_processes(&self, index: DeviceIndex) -> Result<Vec<MemoryHolder>, Report<GpuError>> {
        (**self).running_processes(index)
    }

    fn utilization_samples(
        &self,
        index: DeviceIndex,
        since: u64,
    ) -> Result<UtilizationWindow, Report<GpuError>> {
        (**self).utilization_samples(index, since)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory [`GpuSource`] for collector and observer tests

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeDevice {
        pub info: DeviceInfo,
        pub holders: Vec<MemoryHolder>,
        pub samples: Vec<UtilizationSample>,
        pub fail_processes: bool,
        pub fail_utilization: bool,
        pub fail_info: bool,
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeGpuSource {
        pub devices: Mutex<Vec<FakeDevice>>,
        pub fail_count: Mutex<bool>,
        /// `since` argument of every utilization query, per device
        pub queries: Mutex<HashMap<DeviceIndex, Vec<u64>>>,
    }

    impl FakeGpuSource {
        pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
            Self {
                devices: Mutex::new(devices),
                ..Self::default()
            }
        }

        pub fn update(&self, index: DeviceIndex, f: impl FnOnce(&mut FakeDevice)) {
            let mut devices = self.devices.lock().expect("poisoned");
            f(&mut devices[index as usize]);
        }

        fn device(&self, index: DeviceIndex) -> FakeDevice {
            self.devices.lock().expect("poisoned")[index as usize].clone()
        }

        fn fail(index: DeviceIndex, call: &'static str) -> Report<GpuError> {
            Report::new(GpuError::DeviceQuery { index, call })
        }
    }

    impl GpuSource for FakeGpuSource {
        fn device_count(&self) -> Result<u32, Report<GpuError>> {
            if *self.fail_count.lock().expect("poisoned") {
                return Err(Report::new(GpuError::DeviceCount));
            }
            Ok(self.devices.lock().expect("poisoned").len() as u32)
        }

        fn device_info(&self, index: DeviceIndex) -> Result<DeviceInfo, Report<GpuError>> {
            let device = self.device(index);
            if device.fail_info {
                return Err(Self::fail(index, "device_by_index"));
            }
            Ok(DeviceInfo {
                index,
                ..device.info
            })
        }

        fn running_processes(
            &self,
            index: DeviceIndex,
        ) -> Result<Vec<MemoryHolder>, Report<GpuError>> {
            let device = self.device(index);
            if device.fail_processes {
                return Err(Self::fail(index, "running_compute_processes"));
            }
            Ok(device.holders)
        }

        fn utilization_samples(
            &self,
            index: DeviceIndex,
            since: u64,
        ) -> Result<UtilizationWindow, Report<GpuError>> {
            self.queries
                .lock()
                .expect("poisoned")
                .entry(index)
                .or_default()
                .push(since);

            let device = self.device(index);
            if device.fail_utilization {
                return Err(Self::fail(index, "process_utilization_stats"));
            }
            let samples: Vec<_> = device
                .samples
                .into_iter()
                .filter(|sample| sample.timestamp > since)
                .collect();
            if samples.is_empty() {
                Ok(UtilizationWindow::NoData)
            } else {
                Ok(UtilizationWindow::Samples(samples))
            }
        }
    }
}
