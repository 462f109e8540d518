use std::collections::HashMap;

use serde_json::json;

use super::FieldValue;
use super::MetricsEncoder;

/// JSON encoder for metrics, one object per line
#[derive(Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsEncoder for JsonEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        let json_fields: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| {
                let json_value = match v {
                    FieldValue::UnsignedInteger(u) => serde_json::Value::from(*u),
                    // NaN and infinities have no JSON form
                    FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                        .map_or(serde_json::Value::from(0), serde_json::Value::Number),
                    FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
                };
                (k.clone(), json_value)
            })
            .collect();

        let metrics = json!({
            "measure": measurement,
            "ts": timestamp,
            "tag": tags,
            "field": json_fields,
        });
        metrics.to_string() + "\n"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::Value;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_encode_metrics_basic() {
        let encoder = JsonEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("gpu".to_string(), "0".to_string());
        tags.insert("process".to_string(), "python".to_string());

        let mut fields = HashMap::new();
        fields.insert("idle_seconds".to_string(), 85.5.into());
        fields.insert("memory_bytes".to_string(), 1024u64.into());
        fields.insert("is_idle".to_string(), true.into());

        let result = encoder.encode_metrics("gpu_idle_process", &tags, &fields, 1609459200);
        assert!(result.ends_with('\n'));

        let parsed: Value = serde_json::from_str(&result).expect("should be valid JSON");
        assert_eq!(parsed["measure"], "gpu_idle_process");
        assert_eq!(parsed["ts"], 1609459200);
        assert_eq!(parsed["tag"]["process"], "python");
        assert_eq!(parsed["field"]["idle_seconds"], 85.5);
        assert_eq!(parsed["field"]["memory_bytes"], 1024);
        assert_eq!(parsed["field"]["is_idle"], true);
    }

    #[test]
    fn test_non_finite_float_becomes_zero() {
        let encoder = JsonEncoder::new();
        let mut fields = HashMap::new();
        fields.insert("power_watts".to_string(), f64::NAN.into());

        let result = encoder.encode_metrics("gpu_idle_device", &HashMap::new(), &fields, 1);
        let parsed: Value = serde_json::from_str(&result).expect("should be valid JSON");

        assert_eq!(parsed["field"]["power_watts"], 0);
        assert!(parsed["tag"].as_object().expect("tag object").is_empty());
    }
}
