use std::collections::HashMap;

use influxdb_line_protocol::LineProtocolBuilder;

use super::FieldValue;
use super::MetricsEncoder;

/// InfluxDB line protocol encoder
#[derive(Default)]
pub struct InfluxEncoder;

impl InfluxEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsEncoder for InfluxEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(measurement);

        let mut tag_entries: Vec<_> = tags.iter().collect();
        tag_entries.sort_by_key(|(k, _)| *k);
        for (key, value) in tag_entries {
            builder = builder.tag(key, value);
        }

        let mut field_entries: Vec<_> = fields.iter().collect();
        field_entries.sort_by_key(|(k, _)| *k);

        // the first field moves the builder into its after-field state
        let Some(((first_key, first_value), rest)) = field_entries.split_first() else {
            let line = builder
                .field("_empty", true)
                .timestamp(timestamp)
                .close_line()
                .build();
            return String::from_utf8_lossy(&line).into_owned();
        };

        let mut after_field = match first_value {
            FieldValue::UnsignedInteger(u) => builder.field(first_key, *u),
            FieldValue::Float(f) => builder.field(first_key, *f),
            FieldValue::Boolean(b) => builder.field(first_key, *b),
        };
        for (key, value) in rest {
            after_field = match value {
                FieldValue::UnsignedInteger(u) => after_field.field(key, *u),
                FieldValue::Float(f) => after_field.field(key, *f),
                FieldValue::Boolean(b) => after_field.field(key, *b),
            };
        }

        let line = after_field.timestamp(timestamp).close_line().build();
        String::from_utf8_lossy(&line).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_encode_metrics_basic() {
        let encoder = InfluxEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("node".to_string(), "node-a".to_string());
        tags.insert("gpu".to_string(), "0".to_string());

        let mut fields = HashMap::new();
        fields.insert("idle_seconds".to_string(), 85.5.into());
        fields.insert("memory_bytes".to_string(), 1024u64.into());

        let result = encoder.encode_metrics("gpu_idle_process", &tags, &fields, 1609459200000);

        assert_eq!(
            result,
            "gpu_idle_process,gpu=0,node=node-a idle_seconds=85.5,memory_bytes=1024u 1609459200000\n"
        );
    }

    #[test]
    fn test_encode_metrics_empty_fields() {
        let encoder = InfluxEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("gpu".to_string(), "3".to_string());

        let result = encoder.encode_metrics("empty_fields", &tags, &HashMap::new(), 1234567890);

        assert!(result.starts_with("empty_fields,gpu=3"));
        assert!(result.contains("_empty=true"));
    }

    #[test]
    fn test_encode_metrics_all_field_types() {
        let encoder = InfluxEncoder::new();
        let mut fields = HashMap::new();
        fields.insert("uint_val".to_string(), 42u64.into());
        fields.insert("bool_val".to_string(), false.into());
        fields.insert("float_val".to_string(), 0.25f64.into());

        let result = encoder.encode_metrics("mixed", &HashMap::new(), &fields, 1);

        assert!(result.starts_with("mixed "));
        assert!(result.contains("uint_val=42u"));
        assert!(result.contains("bool_val=false"));
        assert!(result.contains("float_val=0.25"));
    }

    #[test]
    fn test_tag_values_with_spaces_are_escaped() {
        let encoder = InfluxEncoder::new();
        let mut tags = HashMap::new();
        tags.insert("model".to_string(), "NVIDIA A100".to_string());
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), 1u64.into());

        let result = encoder.encode_metrics("gpu_idle_device", &tags, &fields, 1);

        assert!(result.contains(r"model=NVIDIA\ A100"));
    }
}
