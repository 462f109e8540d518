use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use derive_more::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::DeviceIndex;
use crate::infrastructure::idle_observer::CycleReport;

pub mod encoders;
pub mod gauges;

use encoders::DeviceMetricsParams;
use encoders::MetricsEncoder;
use encoders::ProcessMetricsParams;
pub use gauges::IdleMetrics;

#[derive(Debug, Display)]
pub enum MetricsError {
    #[display("failed to create metrics registry: {message}")]
    Registry { message: String },
    #[display("failed to register metric `{name}`: {message}")]
    Registration { name: String, message: String },
    #[display("failed to encode metrics: {message}")]
    Encode { message: String },
}

impl core::error::Error for MetricsError {}

/// Keeps the Prometheus gauges in step with every published cycle.
pub(crate) async fn run_prometheus_updates(
    mut receiver: watch::Receiver<Arc<CycleReport>>,
    metrics: Arc<IdleMetrics>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("Prometheus update task shutdown requested");
                break;
            }
            changed = receiver.changed() => {
                if changed.is_err() {
                    tracing::info!("Cycle publisher closed");
                    break;
                }
                let report = receiver.borrow_and_update().clone();
                metrics.update(&report);
            }
        }
    }
}

/// Writes the latest cycle to the `metrics` log target once every
/// `metrics_batch_size` published cycles.
pub(crate) async fn run_metrics_sink<E: MetricsEncoder>(
    mut receiver: watch::Receiver<Arc<CycleReport>>,
    encoder: E,
    metrics_batch_size: usize,
    node_name: &str,
    cancellation_token: CancellationToken,
) {
    let metrics_batch_size = metrics_batch_size.max(1);
    let mut counter = 0;

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("Metrics sink shutdown requested");
                break;
            }
            changed = receiver.changed() => {
                if changed.is_err() {
                    tracing::info!("Cycle publisher closed");
                    break;
                }

                counter += 1;
                // Not enough cycles yet
                if counter < metrics_batch_size {
                    continue;
                }
                counter = 0;

                let report = receiver.borrow_and_update().clone();
                for line in encode_report(&encoder, &report, node_name, current_time()) {
                    tracing::info!(
                        target: "metrics",
                        msg = %line,
                    );
                }
            }
        }
    }
}

/// One line per process view followed by one line per device.
pub(crate) fn encode_report<E: MetricsEncoder + ?Sized>(
    encoder: &E,
    report: &CycleReport,
    node_name: &str,
    timestamp: i64,
) -> Vec<String> {
    let mut idle_memory: HashMap<DeviceIndex, u64> = HashMap::new();
    let mut lines = Vec::with_capacity(report.processes.len() + report.devices.len());

    for process in &report.processes {
        let view = &process.view;
        *idle_memory.entry(view.device).or_default() += view.idle_memory_bytes;
        lines.push(encoder.encode_process_metrics(&ProcessMetricsParams {
            node_name,
            gpu_index: view.device,
            pid: view.pid,
            process_name: &process.name,
            memory_bytes: view.memory_bytes,
            compute_percentage: view.utilization,
            is_idle: view.is_idle,
            idle_seconds: view.idle_duration.as_secs_f64(),
            idle_memory_bytes: view.idle_memory_bytes,
            timestamp,
        }));
    }

    for device in &report.devices {
        lines.push(encoder.encode_device_metrics(&DeviceMetricsParams {
            node_name,
            gpu_index: device.index,
            gpu_uuid: &device.uuid,
            model: &device.name,
            compute_percentage: device.utilization,
            memory_used_bytes: device.memory_used,
            memory_total_bytes: device.memory_total,
            idle_memory_bytes: idle_memory.get(&device.index).copied().unwrap_or(0),
            power_watts: device.power_watts,
            temperature: device.temperature_celsius,
            timestamp,
        }));
    }

    lines
}

/// Milliseconds since the unix epoch
pub fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
