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

//! Self-telemetry: the pipeline reporting on itself as just another
//! collector, plus the hard memory-ceiling guard that is not.
//!
//! [`SelfTelemetryCollector`] snapshots the queue, the sender, and every
//! other collector's counters on each tick and emits them as ordinary
//! [`model::DataPoint`]s through the same scheduler/queue/sender path as any
//! other collector — it is fed into the registry like any other producer,
//! not wired in specially. [`run_memory_guard`] is different in kind: it
//! never produces points, only aborts the process if resident memory
//! crosses a ceiling.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use collector::{Collector, Error};
use model::{DataPoint, MetaCatalog, MetricMeta, RateType, TagSet, Value};
use queue::BoundedQueue;
use scheduler::StatsTable;
use sender::SenderStats;
use signal::ShutdownHandle;

/// The default interval self-telemetry is sampled on, matching the
/// pipeline's default collection frequency.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// How often the memory guard samples resident memory.
const MEMORY_GUARD_INTERVAL: Duration = Duration::from_secs(60);

/// The default hard memory ceiling, in bytes (500 MB).
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 500 * 1024 * 1024;

/// Registers metadata for every point self-telemetry (and the sender's own
/// per-cycle gauges) emits, so the metadata publisher has a populated
/// catalog to report rather than an empty one. Mirrors the source's own
/// startup-time `metadata.AddMetricMeta("collector.version", ...)` call
/// (`original_source/base/base.go`), generalized from that one metric to
/// the whole set this pipeline emits about itself.
pub fn register_meta(catalog: &MetaCatalog) {
    // Every point self-telemetry emits carries `host` once it passes through
    // the scheduler; the per-collector points additionally carry `name`.
    let host_only = || TagSet::new().with_host("").key_signature();
    let per_collector = || {
        let mut tags = TagSet::new().with_host("");
        let _ = tags.insert("name", "placeholder");
        tags.key_signature()
    };

    let meta = |metric: &str, rate_type: RateType, unit: &str, description: &str| MetricMeta {
        metric: metric.to_string(),
        rate_type,
        unit: unit.to_string(),
        description: description.to_string(),
    };

    let _ = catalog.record(meta("collect.queued", RateType::Gauge, "points", "current queue length"), host_only());
    let _ = catalog.record(
        meta("collect.dropped", RateType::Counter, "points", "cumulative points dropped for queue overflow"),
        host_only(),
    );
    let _ = catalog.record(
        meta("collect.sent", RateType::Counter, "points", "cumulative points successfully transmitted"),
        host_only(),
    );
    let _ = catalog.record(meta("collect.alloc", RateType::Gauge, "bytes", "process resident memory estimate"), host_only());
    let _ = catalog.record(
        meta("collect.post.batchsize", RateType::Gauge, "points", "size of the most recently sent batch"),
        host_only(),
    );
    let _ = catalog.record(
        meta("collect.post.duration", RateType::Gauge, "milliseconds", "duration of the most recent batch POST"),
        host_only(),
    );
    let _ = catalog.record(
        meta("collect.collectors.duration", RateType::Gauge, "milliseconds", "duration of a collector's most recently completed run"),
        per_collector(),
    );
    let _ = catalog.record(
        meta("collect.collectors.error", RateType::Counter, "errors", "cumulative count of a collector's failed runs"),
        per_collector(),
    );
    let _ = catalog.record(
        meta(
            "collect.collectors.skipped",
            RateType::Counter,
            "fires",
            "cumulative count of fires skipped because the previous run was still in flight",
        ),
        per_collector(),
    );
    let _ = catalog.record(
        meta("collect.collectors.overran", RateType::Counter, "runs", "cumulative count of runs exceeding their soft deadline"),
        per_collector(),
    );
}

fn gauge(metric: &str, timestamp: i64, value: impl Into<Value>) -> Option<DataPoint> {
    match DataPoint::new(metric, timestamp, value, TagSet::new()) {
        Ok(point) => Some(point),
        Err(error) => {
            tracing::warn!(%error, metric, "failed to build self-telemetry point");
            None
        }
    }
}

/// A collector that reports on the pipeline's own health: current queue
/// length, cumulative drops and sends, an estimate of resident memory, and
/// per-collector duration/error/skipped/overran counts.
pub struct SelfTelemetryCollector {
    interval: Duration,
    queue: Arc<BoundedQueue>,
    sender_stats: SenderStats,
    collector_stats: StatsTable,
}

impl SelfTelemetryCollector {
    /// Creates the self-telemetry collector, reading from the same queue,
    /// sender counters, and scheduler stats table the rest of the pipeline
    /// shares.
    pub fn new(interval: Duration, queue: Arc<BoundedQueue>, sender_stats: SenderStats, collector_stats: StatsTable) -> Self {
        Self { interval, queue, sender_stats, collector_stats }
    }
}

#[async_trait]
impl Collector for SelfTelemetryCollector {
    fn name(&self) -> &str {
        "collect"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&mut self) -> (Vec<DataPoint>, Option<Error>) {
        let timestamp = now_secs();
        let mut points = Vec::new();

        let stats = self.queue.stats();
        points.extend(gauge("collect.queued", timestamp, stats.len as i64));
        points.extend(gauge("collect.dropped", timestamp, stats.dropped as i64));
        points.extend(gauge("collect.sent", timestamp, self.sender_stats.sent() as i64));

        if let Some(rss) = resident_memory_bytes() {
            points.extend(gauge("collect.alloc", timestamp, rss as i64));
        }

        let per_collector = self
            .collector_stats
            .lock()
            .expect("scheduler stats lock poisoned")
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect::<Vec<_>>();
        for (name, snapshot) in per_collector {
            let mut tags = TagSet::new();
            if tags.insert("name", name.as_str()).is_err() {
                continue;
            }
            if let Ok(point) = DataPoint::new(
                "collect.collectors.duration",
                timestamp,
                snapshot.duration_ms as i64,
                tags.clone(),
            ) {
                points.push(point);
            }
            if let Ok(point) = DataPoint::new("collect.collectors.error", timestamp, snapshot.error as i64, tags.clone()) {
                points.push(point);
            }
            if let Ok(point) = DataPoint::new("collect.collectors.skipped", timestamp, snapshot.skipped as i64, tags.clone()) {
                points.push(point);
            }
            if let Ok(point) = DataPoint::new("collect.collectors.overran", timestamp, snapshot.overran as i64, tags) {
                points.push(point);
            }
        }

        (points, None)
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Returns an estimate of this process's resident memory in bytes, read
/// from `/proc/self/statm`. Returns `None` off Linux or if the read fails,
/// in which case `collect.alloc` is simply not emitted that tick.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64;
    Some(resident_pages * page_size)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

/// Runs until `shutdown` trips, checking resident memory against
/// `ceiling_bytes` once per minute. This is the pipeline's last-resort
/// guard against unbounded growth from a bug in a collector: crossing the
/// ceiling is fatal and intentionally not graceful, matching the
/// `MemoryExceeded` entry of the error taxonomy (exit code 2).
pub async fn run_memory_guard(ceiling_bytes: u64, mut shutdown: ShutdownHandle) {
    loop {
        if shutdown.sleep_or_signalled(MEMORY_GUARD_INTERVAL).await {
            return;
        }
        if let Some(rss) = resident_memory_bytes() {
            if rss > ceiling_bytes {
                tracing::error!(rss, ceiling_bytes, "resident memory exceeded hard ceiling, aborting");
                std::process::exit(2);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use scheduler::new_stats_table;

    use super::*;

    #[test]
    fn register_meta_populates_catalog_for_every_self_telemetry_metric() {
        let catalog = MetaCatalog::new();
        register_meta(&catalog);

        let snapshot = catalog.snapshot();
        let metrics: Vec<&str> = snapshot.iter().map(|record| record.metric.as_str()).collect();
        assert!(metrics.contains(&"collect.queued"));
        assert!(metrics.contains(&"collect.post.duration"));
        assert!(metrics.contains(&"collect.collectors.overran"));
        assert_eq!(snapshot.len(), 10);
    }

    #[tokio::test]
    async fn emits_queue_and_sender_gauges() {
        let queue = Arc::new(BoundedQueue::new(10));
        assert!(queue.push(DataPoint::new("x", 0, 1i64, TagSet::new()).unwrap()));

        let mut collector = SelfTelemetryCollector::new(
            DEFAULT_INTERVAL,
            queue,
            SenderStats::default(),
            new_stats_table(),
        );
        let (points, error) = collector.run().await;

        assert!(error.is_none());
        assert!(points.iter().any(|p| p.metric == "collect.queued" && p.value == Value::Int(1)));
        assert!(points.iter().any(|p| p.metric == "collect.sent" && p.value == Value::Int(0)));
    }

    #[tokio::test]
    async fn emits_per_collector_counters_with_name_tag() {
        let stats_table = new_stats_table();
        let _ = stats_table
            .lock()
            .unwrap()
            .insert("cpu".to_string(), Arc::new(scheduler::CollectorStats::default()));

        let mut collector = SelfTelemetryCollector::new(
            DEFAULT_INTERVAL,
            Arc::new(BoundedQueue::new(10)),
            SenderStats::default(),
            stats_table,
        );
        let (points, _) = collector.run().await;

        let duration_point = points
            .iter()
            .find(|p| p.metric == "collect.collectors.duration")
            .expect("duration point emitted for cpu collector");
        assert_eq!(duration_point.tags.get("name"), Some("cpu"));
    }

    #[tokio::test]
    async fn memory_guard_exits_cleanly_on_shutdown_without_checking() {
        let (shutdown, handle) = signal::channel();
        shutdown.trigger();
        // Resolves immediately because the signal is already tripped; never
        // reaches the exit(2) path.
        run_memory_guard(u64::MAX, handle).await;
    }
}
