//! Metric records emitted by monitors.

use std::collections::BTreeMap;

use crate::Value;

/// A single metric value produced by one sample.
///
/// # Example
///
/// ```rust
/// use samplewatch_types::{MetricRecord, Value};
///
/// let record = MetricRecord::new("loadavg.1m", 0.42).with_field("host", "db-1");
/// assert_eq!(record.value, Value::Float(0.42));
/// assert_eq!(record.extra_fields.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricRecord {
    /// Name of the monitor that produced the record. Filled in by the runtime
    /// when the record is emitted.
    #[cfg_attr(feature = "serde", serde(default))]
    pub monitor: String,

    pub metric: String,

    pub value: Value,

    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "BTreeMap::is_empty")
    )]
    pub extra_fields: BTreeMap<String, Value>,

    /// Unix timestamp in milliseconds when the value was sampled.
    pub timestamp_ms: u64,
}

impl MetricRecord {
    /// Create a record stamped with the current time.
    pub fn new(metric: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_timestamp(metric, value, current_timestamp_ms())
    }

    /// Create a record with an explicit timestamp.
    pub fn with_timestamp(metric: impl Into<String>, value: impl Into<Value>, timestamp_ms: u64) -> Self {
        Self {
            monitor: String::new(),
            metric: metric.into(),
            value: value.into(),
            extra_fields: BTreeMap::new(),
            timestamp_ms,
        }
    }

    /// Attach an extra field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_fields.insert(name.into(), value.into());
        self
    }
}

/// Current Unix time in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_has_current_timestamp() {
        let before = current_timestamp_ms();
        let record = MetricRecord::new("m", 1);
        let after = current_timestamp_ms();

        assert!(record.timestamp_ms >= before);
        assert!(record.timestamp_ms <= after);
        assert!(record.monitor.is_empty());
    }

    #[test]
    fn with_field_overwrites_same_name() {
        let record = MetricRecord::with_timestamp("m", 1, 0)
            .with_field("k", "a")
            .with_field("k", "b");
        assert_eq!(record.extra_fields.get("k"), Some(&Value::from("b")));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_omits_empty_extra_fields() {
        let record = MetricRecord::with_timestamp("m", 2.5, 1000);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"monitor":"","metric":"m","value":2.5,"timestamp_ms":1000}"#);
    }
}
