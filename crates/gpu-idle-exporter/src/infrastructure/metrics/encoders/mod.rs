use std::collections::HashMap;

pub mod influx;
pub mod json;

pub const PROCESS_MEASUREMENT: &str = "gpu_idle_process";
pub const DEVICE_MEASUREMENT: &str = "gpu_idle_device";

/// Parameters for encoding one process idle view
#[derive(Debug, Clone)]
pub struct ProcessMetricsParams<'a> {
    pub node_name: &'a str,
    pub gpu_index: u32,
    pub pid: u32,
    pub process_name: &'a str,
    pub memory_bytes: u64,
    pub compute_percentage: u32,
    pub is_idle: bool,
    pub idle_seconds: f64,
    pub idle_memory_bytes: u64,
    pub timestamp: i64,
}

/// Parameters for encoding device level readings
#[derive(Debug, Clone)]
pub struct DeviceMetricsParams<'a> {
    pub node_name: &'a str,
    pub gpu_index: u32,
    pub gpu_uuid: &'a str,
    pub model: &'a str,
    pub compute_percentage: u32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub idle_memory_bytes: u64,
    pub power_watts: f64,
    pub temperature: u32,
    pub timestamp: i64,
}

/// Field value for metrics
#[derive(Debug, Clone)]
pub enum FieldValue {
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UnsignedInteger(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::UnsignedInteger(u64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Trait for encoding metrics in different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encode metrics with measurement name, tags, fields, and timestamp
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String;

    fn encode_process_metrics(&self, params: &ProcessMetricsParams) -> String {
        let mut tags = HashMap::new();
        tags.insert("node".to_string(), params.node_name.to_string());
        tags.insert("gpu".to_string(), params.gpu_index.to_string());
        tags.insert("pid".to_string(), params.pid.to_string());
        tags.insert("process".to_string(), params.process_name.to_string());

        let mut fields = HashMap::new();
        fields.insert("memory_bytes".to_string(), params.memory_bytes.into());
        fields.insert(
            "compute_percentage".to_string(),
            params.compute_percentage.into(),
        );
        fields.insert("is_idle".to_string(), params.is_idle.into());
        fields.insert("idle_seconds".to_string(), params.idle_seconds.into());
        fields.insert(
            "idle_memory_bytes".to_string(),
            params.idle_memory_bytes.into(),
        );

        self.encode_metrics(PROCESS_MEASUREMENT, &tags, &fields, params.timestamp)
    }

    fn encode_device_metrics(&self, params: &DeviceMetricsParams) -> String {
        let mut tags = HashMap::new();
        tags.insert("node".to_string(), params.node_name.to_string());
        tags.insert("gpu".to_string(), params.gpu_index.to_string());
        tags.insert("uuid".to_string(), params.gpu_uuid.to_string());
        tags.insert("model".to_string(), params.model.to_string());

        let mut fields = HashMap::new();
        fields.insert(
            "compute_percentage".to_string(),
            params.compute_percentage.into(),
        );
        fields.insert(
            "memory_used_bytes".to_string(),
            params.memory_used_bytes.into(),
        );
        fields.insert(
            "memory_total_bytes".to_string(),
            params.memory_total_bytes.into(),
        );
        fields.insert(
            "idle_memory_bytes".to_string(),
            params.idle_memory_bytes.into(),
        );
        fields.insert("power_watts".to_string(), params.power_watts.into());
        fields.insert("temperature".to_string(), params.temperature.into());

        self.encode_metrics(DEVICE_MEASUREMENT, &tags, &fields, params.timestamp)
    }
}

/// Concrete encoder without dynamic dispatch
pub enum Encoder {
    Json(json::JsonEncoder),
    Influx(influx::InfluxEncoder),
}

impl MetricsEncoder for Encoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        match self {
            Encoder::Json(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
            Encoder::Influx(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
        }
    }
}

/// Unknown formats fall back to influx line protocol
pub fn create_encoder(format: &str) -> Encoder {
    match format.to_lowercase().as_str() {
        "json" => Encoder::Json(json::JsonEncoder::new()),
        _ => Encoder::Influx(influx::InfluxEncoder::new()),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn process_params() -> ProcessMetricsParams<'static> {
        ProcessMetricsParams {
            node_name: "node-a",
            gpu_index: 1,
            pid: 4242,
            process_name: "python",
            memory_bytes: 1 << 30,
            compute_percentage: 0,
            is_idle: true,
            idle_seconds: 12.5,
            idle_memory_bytes: 1 << 30,
            timestamp: 1_700_000_000_000,
        }
    }

    fn device_params() -> DeviceMetricsParams<'static> {
        DeviceMetricsParams {
            node_name: "node-a",
            gpu_index: 1,
            gpu_uuid: "GPU-abc",
            model: "NVIDIA L4",
            compute_percentage: 17,
            memory_used_bytes: 2048,
            memory_total_bytes: 4096,
            idle_memory_bytes: 1024,
            power_watts: 31.5,
            temperature: 48,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_field_value_from_u32_widens() {
        let value: FieldValue = 7u32.into();
        match value {
            FieldValue::UnsignedInteger(u) => assert_eq!(u, 7),
            other => panic!("Expected UnsignedInteger variant, got {other:?}"),
        }
    }

    #[test]
    fn test_create_encoder_json() {
        let encoder = create_encoder("JSON");
        assert!(matches!(encoder, Encoder::Json(_)));
    }

    #[test]
    fn test_create_encoder_defaults_to_influx() {
        assert!(matches!(create_encoder("influx"), Encoder::Influx(_)));
        assert!(matches!(create_encoder("unknown_format"), Encoder::Influx(_)));
    }

    #[test]
    fn test_encode_process_metrics_influx() {
        let result = create_encoder("influx").encode_process_metrics(&process_params());

        assert!(result.starts_with(PROCESS_MEASUREMENT));
        assert!(result.contains("node=node-a"));
        assert!(result.contains("gpu=1"));
        assert!(result.contains("pid=4242"));
        assert!(result.contains("process=python"));
        assert!(result.contains("is_idle=true"));
        assert!(result.contains("idle_seconds=12.5"));
        assert!(result.contains("idle_memory_bytes=1073741824u"));
        assert!(result.contains("1700000000000"));
    }

    #[test]
    fn test_encode_device_metrics_json() {
        let result = create_encoder("json").encode_device_metrics(&device_params());
        let parsed: serde_json::Value =
            serde_json::from_str(&result).expect("should be valid JSON");

        assert_eq!(parsed["measure"], DEVICE_MEASUREMENT);
        assert_eq!(parsed["tag"]["uuid"], "GPU-abc");
        assert_eq!(parsed["tag"]["model"], "NVIDIA L4");
        assert_eq!(parsed["field"]["memory_total_bytes"], 4096);
        assert_eq!(parsed["field"]["idle_memory_bytes"], 1024);
        assert_eq!(parsed["field"]["power_watts"], 31.5);
    }
}
