//! [`MetricMeta`] and the process-wide metadata catalog.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

/// The rate type of a metric, as understood by the downstream time-series
/// database and the metadata sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateType {
    /// An instantaneous value, e.g. current queue length.
    Gauge,
    /// A monotonically increasing value, e.g. total points sent.
    Counter,
    /// A pre-computed rate, e.g. points per second.
    Rate,
}

/// Describes a metric for the metadata sidecar: its rate type, unit, and a
/// human-readable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    /// The metric name this metadata describes.
    pub metric: String,
    /// The rate type of the metric.
    pub rate_type: RateType,
    /// The unit of the metric, e.g. `"bytes"` or `"points"`.
    pub unit: String,
    /// A human-readable description.
    pub description: String,
}

/// The wire representation of one catalog entry, as posted to the metadata
/// sidecar: `{metric, tags_signature, rate_type, unit, desc}`.
#[derive(Debug, Clone, Serialize)]
pub struct MetaRecord {
    /// The metric name.
    pub metric: String,
    /// The sorted, comma-joined tag *keys* this metric is recorded with.
    pub tags_signature: String,
    /// The rate type of the metric.
    pub rate_type: RateType,
    /// The unit of the metric.
    pub unit: String,
    /// A human-readable description (named `desc` on the wire).
    #[serde(rename = "desc")]
    pub description: String,
}

/// A process-wide catalog of [`MetricMeta`], keyed by `(metric, tag-key-signature)`.
///
/// Writes are last-writer-wins; a write that disagrees with the stored entry
/// on `rate_type` or `unit` is logged as an inconsistency rather than
/// rejected, matching the "pipeline never crashes on bad collector input"
/// propagation policy.
#[derive(Clone, Default)]
pub struct MetaCatalog {
    entries: Arc<Mutex<HashMap<(String, String), MetricMeta>>>,
}

impl MetaCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or overwrites) a metric's metadata for the given tag-key
    /// signature. Returns `true` if this write overwrote a prior entry with
    /// a differing `rate_type` or `unit` (an inconsistency the caller should
    /// log).
    pub fn record(&self, meta: MetricMeta, tag_key_signature: String) -> bool {
        let key = (meta.metric.clone(), tag_key_signature);
        let mut entries = self.entries.lock().expect("meta catalog lock poisoned");
        let inconsistent = entries
            .get(&key)
            .map(|existing| existing.rate_type != meta.rate_type || existing.unit != meta.unit)
            .unwrap_or(false);
        let _ = entries.insert(key, meta);
        inconsistent
    }

    /// Returns a snapshot of every catalog entry as metadata-sidecar wire
    /// records.
    pub fn snapshot(&self) -> Vec<MetaRecord> {
        self.entries
            .lock()
            .expect("meta catalog lock poisoned")
            .iter()
            .map(|((_, tags_signature), meta)| MetaRecord {
                metric: meta.metric.clone(),
                tags_signature: tags_signature.clone(),
                rate_type: meta.rate_type,
                unit: meta.unit.clone(),
                description: meta.description.clone(),
            })
            .collect()
    }

    /// Returns the number of distinct `(metric, tag-key-signature)` entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("meta catalog lock poisoned").len()
    }

    /// Returns `true` if the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn meta(unit: &str) -> MetricMeta {
        MetricMeta {
            metric: "collect.sent".to_string(),
            rate_type: RateType::Counter,
            unit: unit.to_string(),
            description: "points sent".to_string(),
        }
    }

    #[test]
    fn last_writer_wins() {
        let catalog = MetaCatalog::new();
        let _ = catalog.record(meta("points"), String::new());
        let _ = catalog.record(meta("bytes"), String::new());

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].unit, "bytes");
    }

    #[test]
    fn flags_unit_inconsistency() {
        let catalog = MetaCatalog::new();
        assert!(!catalog.record(meta("points"), String::new()));
        assert!(catalog.record(meta("bytes"), String::new()));
    }

    #[test]
    fn distinct_tag_signatures_are_distinct_entries() {
        let catalog = MetaCatalog::new();
        let _ = catalog.record(meta("points"), "host".to_string());
        let _ = catalog.record(meta("points"), "host,region".to_string());
        assert_eq!(catalog.len(), 2);
    }
}
