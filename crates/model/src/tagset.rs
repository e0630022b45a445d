//! [`TagSet`]: a tag-name to tag-value mapping with a canonical wire form.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::Error;

/// The tag key reserved for the canonical hostname, injected by the pipeline
/// itself. Collectors are not allowed to set it in their base tag set.
pub const HOST_TAG: &str = "host";

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._/-]+$").expect("static tag pattern is valid"));

/// A mapping from tag-name to tag-value.
///
/// Internally backed by a `BTreeMap` so iteration order is always the
/// canonical, lexicographically-sorted order required by [`TagSet::canonical`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag, validating both the key and the value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let key = key.into();
        let value = value.into();
        validate_component(&key, &value)?;
        let _ = self.tags.insert(key, value);
        Ok(())
    }

    /// Returns `true` if this tag set (as supplied by a collector, before the
    /// `host` tag is injected) illegally sets the reserved `host` tag.
    pub fn has_reserved_host_tag(&self) -> bool {
        self.tags.contains_key(HOST_TAG)
    }

    /// Returns the value associated with a tag key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the number of tags in the set.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if the tag set has no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Returns an iterator over `(key, value)` pairs in canonical (sorted)
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a new `TagSet` with `host` set to the given hostname,
    /// overwriting any previous value (collectors are forbidden from setting
    /// it, so in practice there is none).
    #[must_use]
    pub fn with_host(mut self, hostname: &str) -> Self {
        let _ = self.tags.insert(HOST_TAG.to_string(), hostname.to_string());
        self
    }

    /// Merges `other` into `self`, with `other`'s values winning on conflict.
    #[must_use]
    pub fn merged_with(mut self, other: &TagSet) -> Self {
        for (k, v) in other.iter() {
            let _ = self.tags.insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Returns the canonical wire form: keys sorted lexicographically (the
    /// `BTreeMap` already guarantees this), joined as `k=v` pairs separated by
    /// commas. Used for equality, hashing, and wire emission.
    pub fn canonical(&self) -> String {
        self.tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns a signature of the tag *keys* only (sorted, comma-joined),
    /// used to key the metric-meta catalog.
    pub fn key_signature(&self) -> String {
        self.tags.keys().cloned().collect::<Vec<_>>().join(",")
    }
}

impl Display for TagSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl serde::Serialize for TagSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde::Serialize::serialize(&self.tags, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for TagSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tags = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(TagSet { tags })
    }
}

fn validate_component(key: &str, value: &str) -> Result<(), Error> {
    if key.is_empty() || !NAME_PATTERN.is_match(key) {
        return Err(Error::InvalidTag {
            key: key.to_string(),
            value: value.to_string(),
            reason: "tag key must be non-empty and match [a-zA-Z0-9._/-]+".to_string(),
        });
    }
    if value.is_empty() || !NAME_PATTERN.is_match(value) {
        return Err(Error::InvalidTag {
            key: key.to_string(),
            value: value.to_string(),
            reason: "tag value must be non-empty and match [a-zA-Z0-9._/-]+".to_string(),
        });
    }
    Ok(())
}

/// Validates a metric name against the shared pattern and length limit.
pub fn validate_metric_name(metric: &str) -> Result<(), Error> {
    if metric.is_empty() || metric.len() > 255 || !NAME_PATTERN.is_match(metric) {
        return Err(Error::InvalidMetric {
            metric: metric.to_string(),
            reason: "metric name must be 1-255 bytes matching [a-zA-Z0-9._/-]+".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_form_is_order_independent() {
        let mut a = TagSet::new();
        a.insert("a", "1").unwrap();
        a.insert("b", "2").unwrap();

        let mut b = TagSet::new();
        b.insert("b", "2").unwrap();
        b.insert("a", "1").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "a=1,b=2");
    }

    #[test]
    fn rejects_empty_and_invalid_components() {
        let mut tags = TagSet::new();
        assert!(tags.insert("", "1").is_err());
        assert!(tags.insert("key", "").is_err());
        assert!(tags.insert("bad key", "1").is_err());
        assert!(tags.insert("key", "bad value!").is_err());
    }

    #[test]
    fn with_host_sets_reserved_tag() {
        let tags = TagSet::new().with_host("web01");
        assert_eq!(tags.get(HOST_TAG), Some("web01"));
    }

    #[test]
    fn detects_collector_supplied_host_tag() {
        let mut tags = TagSet::new();
        tags.insert(HOST_TAG, "spoofed").unwrap();
        assert!(tags.has_reserved_host_tag());
    }

    #[test]
    fn key_signature_ignores_values() {
        let mut a = TagSet::new();
        a.insert("a", "1").unwrap();
        a.insert("b", "2").unwrap();

        let mut b = TagSet::new();
        b.insert("a", "99").unwrap();
        b.insert("b", "other").unwrap();

        assert_eq!(a.key_signature(), b.key_signature());
    }
}
