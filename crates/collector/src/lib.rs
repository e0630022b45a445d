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

//! The `Collector` trait and the registry that holds them between process
//! start and scheduler start.
//!
//! A collector is an opaque, named, periodically-invoked producer of
//! [`model::DataPoint`]s. The pipeline never inspects what a collector does
//! to produce its points (reading `/proc`, polling SNMP, probing HTTP) — it
//! only calls `init` once and `run` on a cadence.

pub mod examples;
mod registry;

use std::time::Duration;

use async_trait::async_trait;
use model::DataPoint;

pub use registry::Registry;

/// All the errors that can occur while registering or running a collector.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A collector was registered after the scheduler had already started.
    #[error("collector registry is frozen, no further registration is possible")]
    RegistryFrozen,

    /// A collector's `run` failed. Any points returned alongside the error
    /// are still forwarded; this is a first-class partial-success outcome.
    #[error("collector run failed (collector: {collector}, reason: {reason})")]
    Transient {
        /// The collector that failed.
        collector: String,
        /// Why it failed.
        reason: String,
    },
}

/// A named, periodically-invoked producer of data points.
///
/// Implementors are free to perform blocking I/O inside `run`; the scheduler
/// isolates each collector in its own task so one collector's latency never
/// delays another (see invariant I4: no collector runs concurrently with
/// itself).
#[async_trait]
pub trait Collector: Send {
    /// The collector's unique name, used for filtering and metric naming.
    fn name(&self) -> &str;

    /// The collector's sampling interval. The scheduler fires it on this
    /// cadence, starting from a random offset within the first interval.
    fn interval(&self) -> Duration;

    /// Whether this collector should be scheduled at all. Disabled
    /// collectors are still registered (and listed by `list_names`) but
    /// never run.
    fn enabled(&self) -> bool {
        true
    }

    /// Called at most once, before the first `run`.
    async fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Samples and returns the points for this tick. A collector may return
    /// both points and an error: the error is logged and counted, the
    /// points are still forwarded.
    async fn run(&mut self) -> (Vec<DataPoint>, Option<Error>);
}
