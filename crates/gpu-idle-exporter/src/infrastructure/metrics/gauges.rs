//! Prometheus gauges for process and device idle state

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use error_stack::Report;
use prometheus::Encoder;
use prometheus::GaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use super::MetricsError;
use crate::domain::DeviceIndex;
use crate::infrastructure::idle_observer::CycleReport;

const PROCESS_LABELS: &[&str] = &["gpu", "pid", "process"];
const DEVICE_LABELS: &[&str] = &["gpu", "model", "uuid"];
const GPU_ONLY_LABEL: &[&str] = &["gpu"];

/// `[gpu, pid, process]`
type ProcessLabelValues = [String; 3];

/// All gauges exported on `/metrics`, registered on a private registry.
pub struct IdleMetrics {
    registry: Registry,

    process_compute_util: GaugeVec,
    process_memory_used: GaugeVec,
    process_idle_seconds: GaugeVec,
    process_idle_memory: GaugeVec,

    device_util: GaugeVec,
    device_memory_used: GaugeVec,
    device_memory_total: GaugeVec,
    device_power: GaugeVec,
    device_temperature: GaugeVec,

    idle_memory_total: GaugeVec,

    // label sets emitted by the previous update, for stale series removal
    previous_process_labels: Mutex<HashSet<ProcessLabelValues>>,
}

impl IdleMetrics {
    /// `const_labels` (node, pod, namespace) are attached to every series.
    pub fn new(const_labels: HashMap<String, String>) -> Result<Self, Report<MetricsError>> {
        let const_labels = (!const_labels.is_empty()).then_some(const_labels);
        let registry = Registry::new_custom(None, const_labels).map_err(|e| {
            Report::new(MetricsError::Registry {
                message: e.to_string(),
            })
        })?;

        let gauge = |name: &str, help: &str, labels: &[&str]| -> Result<GaugeVec, Report<MetricsError>> {
            let vec = GaugeVec::new(Opts::new(name, help), labels)
                .and_then(|vec| registry.register(Box::new(vec.clone())).map(|()| vec))
                .map_err(|e| {
                    Report::new(MetricsError::Registration {
                        name: name.to_string(),
                        message: e.to_string(),
                    })
                })?;
            Ok(vec)
        };

        Ok(Self {
            process_compute_util: gauge(
                "gpu_idle_process_compute_utilization_percent",
                "GPU compute (SM) utilization percentage for this process.",
                PROCESS_LABELS,
            )?,
            process_memory_used: gauge(
                "gpu_idle_process_memory_used_bytes",
                "GPU memory held by this process in bytes.",
                PROCESS_LABELS,
            )?,
            process_idle_seconds: gauge(
                "gpu_idle_process_idle_seconds",
                "Duration in seconds this process has been idle (0% compute while holding memory). 0 when active.",
                PROCESS_LABELS,
            )?,
            process_idle_memory: gauge(
                "gpu_idle_process_idle_memory_bytes",
                "GPU memory in bytes held by this process while idle. 0 when active.",
                PROCESS_LABELS,
            )?,
            device_util: gauge(
                "gpu_idle_device_utilization_percent",
                "GPU compute utilization percentage (device-level).",
                DEVICE_LABELS,
            )?,
            device_memory_used: gauge(
                "gpu_idle_device_memory_used_bytes",
                "GPU memory currently used in bytes (device-level).",
                DEVICE_LABELS,
            )?,
            device_memory_total: gauge(
                "gpu_idle_device_memory_total_bytes",
                "GPU total memory in bytes (device-level).",
                DEVICE_LABELS,
            )?,
            device_power: gauge(
                "gpu_idle_device_power_watts",
                "GPU current power draw in watts.",
                DEVICE_LABELS,
            )?,
            device_temperature: gauge(
                "gpu_idle_device_temperature_celsius",
                "GPU core temperature in Celsius.",
                DEVICE_LABELS,
            )?,
            idle_memory_total: gauge(
                "gpu_idle_memory_total_bytes",
                "Total GPU memory in bytes held by all idle processes on this GPU.",
                GPU_ONLY_LABEL,
            )?,
            registry,
            previous_process_labels: Mutex::new(HashSet::new()),
        })
    }

    fn process_gauges(&self) -> [&GaugeVec; 4] {
        [
            &self.process_compute_util,
            &self.process_memory_used,
            &self.process_idle_seconds,
            &self.process_idle_memory,
        ]
    }

    /// Sets every gauge from a published cycle and removes process series
    /// that were present last time but not in this cycle.
    pub fn update(&self, report: &CycleReport) {
        for device in &report.devices {
            let gpu = device.index.to_string();
            let labels = [gpu.as_str(), device.name.as_str(), device.uuid.as_str()];

            self.device_util
                .with_label_values(&labels)
                .set(f64::from(device.utilization));
            self.device_memory_used
                .with_label_values(&labels)
                .set(device.memory_used as f64);
            self.device_memory_total
                .with_label_values(&labels)
                .set(device.memory_total as f64);
            self.device_power
                .with_label_values(&labels)
                .set(device.power_watts);
            self.device_temperature
                .with_label_values(&labels)
                .set(f64::from(device.temperature_celsius));
        }

        let mut current = HashSet::with_capacity(report.processes.len());
        let mut idle_memory_by_gpu: BTreeMap<DeviceIndex, u64> = BTreeMap::new();

        for process in &report.processes {
            let view = &process.view;
            let values: ProcessLabelValues = [
                view.device.to_string(),
                view.pid.to_string(),
                process.name.clone(),
            ];
            let labels = [values[0].as_str(), values[1].as_str(), values[2].as_str()];

            self.process_compute_util
                .with_label_values(&labels)
                .set(f64::from(view.utilization));
            self.process_memory_used
                .with_label_values(&labels)
                .set(view.memory_bytes as f64);
            self.process_idle_seconds
                .with_label_values(&labels)
                .set(view.idle_duration.as_secs_f64());
            self.process_idle_memory
                .with_label_values(&labels)
                .set(view.idle_memory_bytes as f64);

            *idle_memory_by_gpu.entry(view.device).or_default() += view.idle_memory_bytes;
            current.insert(values);
        }

        for device in &report.devices {
            let idle_memory = idle_memory_by_gpu.get(&device.index).copied().unwrap_or(0);
            self.idle_memory_total
                .with_label_values(&[device.index.to_string().as_str()])
                .set(idle_memory as f64);
        }

        let mut previous = self.previous_process_labels.lock().expect("poisoned");
        for stale in previous.difference(&current) {
            let labels = [stale[0].as_str(), stale[1].as_str(), stale[2].as_str()];
            for gauge in self.process_gauges() {
                // absent when a series was never set on this gauge
                let _ = gauge.remove_label_values(&labels);
            }
        }
        *previous = current;
    }

    /// Prometheus text exposition of every registered gauge
    pub fn render(&self) -> Result<String, Report<MetricsError>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| {
                Report::new(MetricsError::Encode {
                    message: e.to_string(),
                })
            })?;
        String::from_utf8(buffer).map_err(|e| {
            Report::new(MetricsError::Encode {
                message: e.to_string(),
            })
        })
    }
}
