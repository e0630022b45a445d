#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The data model shared by every component of the pipeline: a [`DataPoint`]
//! is a single (metric, timestamp, value, tags) measurement, a [`TagSet`] is
//! its canonicalized tag mapping, and a [`MetricMeta`] describes a metric's
//! unit and rate type for the metadata sidecar.

pub mod datapoint;
pub mod meta;
pub mod tagset;

pub use datapoint::{DataPoint, Value};
pub use meta::{MetaCatalog, MetaRecord, MetricMeta, RateType};
pub use tagset::TagSet;

/// All the errors that can occur while building or validating the data model.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A metric name failed the `[a-zA-Z0-9._/-]+` pattern or exceeded 255 bytes.
    #[error("invalid metric name (metric: {metric}, reason: {reason})")]
    InvalidMetric {
        /// The offending metric name.
        metric: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A tag key or value failed the `[a-zA-Z0-9._/-]+` pattern, or was empty.
    #[error("invalid tag (key: {key}, value: {value}, reason: {reason})")]
    InvalidTag {
        /// The offending tag key.
        key: String,
        /// The offending tag value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A collector supplied the reserved `host` tag in its base tag set.
    #[error("the 'host' tag is reserved and injected by the pipeline (collector: {collector})")]
    ReservedHostTag {
        /// The collector that attempted to set `host`.
        collector: String,
    },
}
