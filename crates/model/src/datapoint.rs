//! [`DataPoint`]: a single (metric, timestamp, value, tags) measurement.

use serde::{Deserialize, Serialize};

use crate::{tagset::validate_metric_name, Error, TagSet};

/// The value carried by a [`DataPoint`]. Integers are kept distinct from
/// floats so that whole numbers up to 2^53 round-trip through JSON without
/// losing exactness to floating-point representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// An exact integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
}

impl Value {
    /// Returns the value widened to `f64`, for use in self-telemetry gauges
    /// and other contexts that don't need to preserve integer exactness.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let number = serde_json::Number::deserialize(deserializer)?;
        if let Some(v) = number.as_i64() {
            Ok(Value::Int(v))
        } else {
            number
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| serde::de::Error::custom("value is neither an i64 nor an f64"))
        }
    }
}

/// A single measurement: a metric name, a unix timestamp in seconds, a value,
/// and a tag set (which always carries the `host` tag once it has passed
/// through the pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// The metric name, matching `[a-zA-Z0-9._/-]+` and at most 255 bytes.
    pub metric: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// The measured value.
    pub value: Value,
    /// The tag set attached to this point.
    pub tags: TagSet,
}

impl DataPoint {
    /// Creates a new `DataPoint`, validating the metric name.
    pub fn new(metric: impl Into<String>, timestamp: i64, value: impl Into<Value>, tags: TagSet) -> Result<Self, Error> {
        let metric = metric.into();
        validate_metric_name(&metric)?;
        Ok(Self {
            metric,
            timestamp,
            value: value.into(),
            tags,
        })
    }

    /// Returns a copy of this point with `host` merged into its tag set,
    /// as the pipeline does for every point before it reaches the queue.
    #[must_use]
    pub fn with_host(mut self, hostname: &str) -> Self {
        self.tags = self.tags.with_host(hostname);
        self
    }

    /// Returns a copy of this point with `base_tags` filled in underneath
    /// its own tags: a tag the collector already set is left alone, and
    /// anything it didn't set is taken from `base_tags`.
    #[must_use]
    pub fn with_base_tags(mut self, base_tags: &TagSet) -> Self {
        self.tags = base_tags.clone().merged_with(&self.tags);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_tags_fill_in_without_overriding_own_tags() {
        let mut tags = TagSet::new();
        tags.insert("env", "collector-set").unwrap();
        let point = DataPoint::new("test.metric", 0, 1i64, tags).unwrap();

        let mut base = TagSet::new();
        base.insert("env", "base").unwrap();
        base.insert("dc", "us1").unwrap();
        let point = point.with_base_tags(&base);

        assert_eq!(point.tags.get("env"), Some("collector-set"));
        assert_eq!(point.tags.get("dc"), Some("us1"));
    }

    #[test]
    fn rejects_invalid_metric_names() {
        assert!(DataPoint::new("", 0, 1i64, TagSet::new()).is_err());
        assert!(DataPoint::new("bad metric!", 0, 1i64, TagSet::new()).is_err());
        assert!(DataPoint::new(&"x".repeat(256), 0, 1i64, TagSet::new()).is_err());
    }

    #[test]
    fn serializes_integer_values_without_decimal_point() {
        let dp = DataPoint::new("test.metric", 1000, 42i64, TagSet::new()).unwrap();
        let json = serde_json::to_string(&dp).unwrap();
        assert!(json.contains("\"value\":42"));
        assert!(!json.contains("42.0"));
    }

    #[test]
    fn serializes_float_values() {
        let dp = DataPoint::new("test.metric", 1000, 42.5f64, TagSet::new()).unwrap();
        let json = serde_json::to_string(&dp).unwrap();
        assert!(json.contains("\"value\":42.5"));
    }

    #[test]
    fn round_trips_through_json() {
        let mut tags = TagSet::new();
        tags.insert("host", "web01").unwrap();
        let dp = DataPoint::new("cpu.idle", 1700000000, 12.34f64, tags).unwrap();

        let json = serde_json::to_string(&dp).unwrap();
        let back: DataPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(dp, back);
    }

    #[test]
    fn preserves_large_integers_exactly() {
        let big = 1i64 << 53;
        let dp = DataPoint::new("big.counter", 0, big, TagSet::new()).unwrap();
        let json = serde_json::to_string(&dp).unwrap();
        let back: DataPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, Value::Int(big));
    }
}
