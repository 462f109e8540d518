use std::sync::Arc;

use anyhow::Result;
use error_stack::Report;
use nvml_wrapper::Nvml;

use super::GpuError;
use super::GpuSource;
use super::NvmlSource;

/// Initialize NVML and log every discovered GPU
pub fn initialize_gpu_system() -> Result<NvmlSource> {
    tracing::info!("Initializing GPU system...");

    let source = NvmlSource::new(Arc::new(init_nvml()?));
    let reachable = discover_gpu_devices(&source)
        .map_err(|report| anyhow::anyhow!("failed to enumerate GPU devices: {report:?}"))?;
    if reachable == 0 {
        tracing::warn!("No reachable GPU device found, exporting empty metrics until one appears");
    }

    Ok(source)
}

pub fn init_nvml() -> Result<Nvml> {
    match Nvml::init() {
        Ok(nvml) => {
            tracing::info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(_) => {
            tracing::warn!("Standard NVML init failed, trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()?;
            tracing::info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

/// Logs every device and returns how many of them answered. A device that
/// cannot be queried is skipped; polling retries it every cycle.
fn discover_gpu_devices<S: GpuSource>(source: &S) -> Result<u32, Report<GpuError>> {
    let device_count = source.device_count()?;
    tracing::info!("Discovered {} GPU device(s)", device_count);

    let mut reachable = 0;
    for i in 0..device_count {
        match source.device_info(i) {
            Ok(info) => {
                tracing::info!(gpu = i, uuid = %info.uuid, "Found GPU {}: {}", i, info.name);
                reachable += 1;
            }
            Err(report) => {
                tracing::warn!(gpu = i, "GPU is not reachable, skipping: {report:?}");
            }
        }
    }

    Ok(reachable)
}
