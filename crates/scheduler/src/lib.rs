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

//! The interval scheduler: one task per collector, firing it on its own
//! cadence (smeared by a random first-fire jitter), forwarding the points it
//! returns to a single output channel.
//!
//! Each collector's task is the only thing that ever calls its `run`, so
//! invariant I4 (no collector runs concurrently with itself) holds for free
//! — there is no cross-collector lock to take. A fixed-rate grid of fire
//! times is kept per collector; a fire that would land while the previous
//! invocation is still running is skipped rather than queued, and counted.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use collector::Collector;
use model::{DataPoint, TagSet};
use signal::ShutdownHandle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Per-collector counters backing the `collect.collectors.{name}.*`
/// self-telemetry metrics.
#[derive(Default)]
pub struct CollectorStats {
    /// Duration in milliseconds of the most recently completed run.
    pub duration_ms: AtomicU64,
    /// Cumulative count of runs that returned an error.
    pub error: AtomicU64,
    /// Cumulative count of fires skipped because the previous run was still
    /// in flight.
    pub skipped: AtomicU64,
    /// Cumulative count of runs that exceeded their soft deadline (their
    /// own interval).
    pub overran: AtomicU64,
}

/// A read-only snapshot of [`CollectorStats`], for self-telemetry to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStatsSnapshot {
    /// See [`CollectorStats::duration_ms`].
    pub duration_ms: u64,
    /// See [`CollectorStats::error`].
    pub error: u64,
    /// See [`CollectorStats::skipped`].
    pub skipped: u64,
    /// See [`CollectorStats::overran`].
    pub overran: u64,
}

impl CollectorStats {
    fn snapshot(&self) -> CollectorStatsSnapshot {
        CollectorStatsSnapshot {
            duration_ms: self.duration_ms.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            overran: self.overran.load(Ordering::Relaxed),
        }
    }
}

/// The shared, name-keyed table of per-collector counters. Created once by
/// the pipeline's control surface and handed both to [`start`] (which
/// populates it as collectors are scheduled) and to the self-telemetry
/// collector that reads it back out as `collect.collectors.{name}.*` points.
pub type StatsTable = Arc<Mutex<HashMap<String, Arc<CollectorStats>>>>;

/// Creates an empty, shareable stats table.
pub fn new_stats_table() -> StatsTable {
    Arc::new(Mutex::new(HashMap::new()))
}

/// A running scheduler: one task per collector plus a shared stats table.
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
    stats: StatsTable,
}

impl SchedulerHandle {
    /// Returns a snapshot of every scheduled collector's counters, keyed by
    /// name.
    pub fn stats(&self) -> HashMap<String, CollectorStatsSnapshot> {
        self.stats
            .lock()
            .expect("scheduler stats lock poisoned")
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }

    /// Waits up to `grace` for every collector task to return on its own
    /// (observing the shutdown signal); any still running after that are
    /// dropped without being awaited further, per the termination contract.
    pub async fn join(self, grace: Duration) {
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        let mut remaining = self.tasks;
        loop {
            if remaining.is_empty() {
                return;
            }
            let mut still_running = Vec::with_capacity(remaining.len());
            for task in remaining {
                if task.is_finished() {
                    let _ = task.await;
                } else {
                    still_running.push(task);
                }
            }
            remaining = still_running;
            if remaining.is_empty() {
                return;
            }
            tokio::select! {
                () = &mut deadline => {
                    warn!(stragglers = remaining.len(), "grace deadline elapsed, abandoning in-flight collector runs");
                    for task in remaining {
                        task.abort();
                    }
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }
}

/// Starts one task per collector, returning a handle for stats and shutdown.
///
/// Each task: waits a random jitter within its first interval, then loops
/// firing on a fixed-rate grid (`previous-fire + interval`, independent of
/// how long the previous run took). Points returned by a run have the
/// process's base tags filled in underneath, `host` merged on top, and are
/// forwarded to `output` without blocking; errors are logged and counted but
/// never stop the collector's schedule.
pub fn start(
    collectors: Vec<Box<dyn Collector>>,
    default_interval: Duration,
    output: flume::Sender<DataPoint>,
    hostname: Arc<str>,
    base_tags: Arc<TagSet>,
    shutdown: ShutdownHandle,
    stats_table: StatsTable,
) -> SchedulerHandle {
    let mut tasks = Vec::with_capacity(collectors.len());

    for collector in collectors {
        let stats = Arc::new(CollectorStats::default());
        let _ = stats_table
            .lock()
            .expect("scheduler stats lock poisoned")
            .insert(collector.name().to_string(), stats.clone());

        let interval = if collector.interval().is_zero() {
            default_interval
        } else {
            collector.interval()
        };
        let task = tokio::spawn(run_collector(
            collector,
            interval,
            output.clone(),
            hostname.clone(),
            base_tags.clone(),
            shutdown.clone(),
            stats,
        ));
        tasks.push(task);
    }

    SchedulerHandle {
        tasks,
        stats: stats_table,
    }
}

async fn run_collector(
    mut collector: Box<dyn Collector>,
    interval: Duration,
    output: flume::Sender<DataPoint>,
    hostname: Arc<str>,
    base_tags: Arc<TagSet>,
    mut shutdown: ShutdownHandle,
    stats: Arc<CollectorStats>,
) {
    let name = collector.name().to_string();

    if let Err(error) = collector.init().await {
        tracing::error!(collector = %name, %error, "collector init failed, it will not be scheduled");
        return;
    }

    let jitter = Duration::from_millis(rand::random::<u64>() % interval.as_millis().max(1) as u64);
    if shutdown.sleep_or_signalled(jitter).await {
        return;
    }

    // `next_fire` is the fixed-rate grid this collector's invocations are
    // scheduled against, independent of each run's actual duration.
    let mut next_fire = Instant::now();

    loop {
        if shutdown.is_signalled() {
            break;
        }

        let started = Instant::now();
        let (points, error) = collector.run().await;
        let elapsed = started.elapsed();

        stats.duration_ms.store(elapsed.as_millis() as u64, Ordering::Relaxed);
        if elapsed > interval {
            let _ = stats.overran.fetch_add(1, Ordering::Relaxed);
            warn!(collector = %name, ?elapsed, ?interval, "collector run exceeded its soft deadline");
        }
        if let Some(error) = error {
            let _ = stats.error.fetch_add(1, Ordering::Relaxed);
            warn!(collector = %name, %error, "collector run returned an error; forwarding any partial points");
        }

        for point in points {
            let point = point.with_base_tags(&base_tags).with_host(&hostname);
            if output.try_send(point).is_err() {
                // Only possible if the ingest channel's receiver has been
                // dropped, i.e. the pipeline is already tearing down.
                break;
            }
        }

        let now = Instant::now();
        let mut next = next_fire + interval;
        while next <= now {
            let _ = stats.skipped.fetch_add(1, Ordering::Relaxed);
            next += interval;
        }
        next_fire = next;

        if shutdown.sleep_or_signalled(next_fire.saturating_duration_since(Instant::now())).await {
            break;
        }
    }

    info!(collector = %name, "collector task exiting");
}
