//! The control surface: wires configuration, the collector registry, the
//! scheduler, the queue, the sender, self-telemetry, and the metadata
//! publisher into one running pipeline, and tears it all down on shutdown.

use std::{
    io::stdout,
    sync::{Arc, Mutex},
    time::Duration,
};

use collector::{examples::fake::FakeCollector, Registry};
use queue::BoundedQueue;
use scheduler::new_stats_table;
use sender::Sender;
use tracing::info;

use crate::{cli::StartArgs, error::PipelineError};

/// How long the scheduler and other tasks are given to observe the shutdown
/// signal and return on their own before being abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Runs the pipeline to completion: builds every component from `args`,
/// starts the tasks described in the control surface, and blocks until a
/// Ctrl-C (or other process-termination) signal, at which point it tears
/// everything down within [`SHUTDOWN_GRACE`].
pub async fn run(args: StartArgs) -> Result<(), PipelineError> {
    let mut config = config::Config::load_or_default(args.conf.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let hostname = resolve_hostname(&config);
    let base_tags = Arc::new(config.base_tags()?);

    let mut registry = Registry::new();
    registry.register(Box::new(FakeCollector::new(args.fake)))?;

    let queue = Arc::new(BoundedQueue::new(queue::DEFAULT_MAX_QUEUE_LEN));
    let (ingress_tx, ingress_rx) = flume::unbounded();

    let request_timeout = SHUTDOWN_GRACE;
    let sender = if config.print {
        let sink: Arc<Mutex<dyn std::io::Write + Send>> = Arc::new(Mutex::new(stdout()));
        Sender::print(queue.clone(), effective_batch_size(&config), sink, ingress_tx.clone(), hostname.clone())
    } else {
        let ingest_url = config
            .ingest_url()?
            .unwrap_or_else(|| "http://localhost:4242/api/put".to_string());
        Sender::http(
            queue.clone(),
            ingest_url,
            non_empty(&config.license),
            effective_batch_size(&config),
            request_timeout,
            ingress_tx.clone(),
            hostname.clone(),
        )
    };
    let sender_stats = sender.stats();

    let meta_catalog = model::MetaCatalog::new();
    let collector_stats = new_stats_table();
    if !config.disable_self_telemetry {
        let self_telemetry = telemetry::SelfTelemetryCollector::new(
            telemetry::DEFAULT_INTERVAL,
            queue.clone(),
            sender_stats.clone(),
            collector_stats.clone(),
        );
        registry.register(Box::new(self_telemetry))?;
        telemetry::register_meta(&meta_catalog);
    }

    let collectors = registry.start(&config.filter);
    if collectors.is_empty() {
        return Err(PipelineError::EmptyFilter { filter: config.filter.clone() });
    }

    let (shutdown, shutdown_handle) = signal::channel();

    let scheduler = scheduler::start(
        collectors,
        Duration::from_secs(config.freq),
        ingress_tx,
        hostname.clone(),
        base_tags,
        shutdown_handle.clone(),
        collector_stats,
    );

    let ingestor_task = tokio::spawn(queue::run_ingestor(ingress_rx, queue.clone()));

    let sender_shutdown = shutdown_handle.clone();
    let sender_task = tokio::spawn(async move { sender.run(sender_shutdown).await });

    let memory_guard_task = tokio::spawn(telemetry::run_memory_guard(config.memory_ceiling_mb * 1024 * 1024, shutdown_handle.clone()));

    let metadata_task = if !args.dismetadata {
        if let Some(metadata_url) = config.metadata_url()? {
            let client = metadata_client(request_timeout, non_empty(&config.license))?;
            Some(tokio::spawn(metadata::run(meta_catalog, metadata_url, metadata::DEFAULT_INTERVAL, client, shutdown_handle.clone())))
        } else {
            None
        }
    } else {
        None
    };

    info!(hostname = %hostname, collectors = scheduler.stats().len(), "pipeline started");

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutdown requested");
    shutdown.trigger();

    scheduler.join(SHUTDOWN_GRACE).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, ingestor_task).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, sender_task).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, memory_guard_task).await;
    if let Some(task) = metadata_task {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
    }

    info!("pipeline stopped");
    Ok(())
}

/// Overlays the `start` subcommand's CLI flags on top of a loaded (or
/// default) `Config`, with a given flag winning over the config file only
/// when it was actually supplied.
fn apply_overrides(config: &mut config::Config, args: &StartArgs) {
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(schedhost) = &args.schedhost {
        config.sched_host = schedhost.clone();
    }
    if let Some(license) = &args.license {
        config.license = license.clone();
    }
    if let Some(filter) = &args.filter {
        config.filter = filter.clone();
    }
    if args.print {
        config.print = true;
    }
    if let Some(batchsize) = args.batchsize {
        config.batch_size = batchsize;
    }
}

fn effective_batch_size(config: &config::Config) -> usize {
    if config.batch_size == 0 {
        sender::DEFAULT_BATCH_SIZE
    } else {
        config.batch_size
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve_hostname(config: &config::Config) -> Arc<str> {
    if !config.hostname.is_empty() {
        return Arc::from(config.hostname.as_str());
    }
    gethostname::gethostname().to_string_lossy().into_owned().into()
}

/// Builds the HTTP client used by the metadata publisher, carrying `license`
/// as the `X-License` header on every request it sends, same as the data
/// sender does for the ingest URL (spec §4.7/§6).
fn metadata_client(request_timeout: Duration, license: Option<String>) -> Result<reqwest::Client, PipelineError> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(license) = license {
        let value = reqwest::header::HeaderValue::from_str(&license).map_err(|error| PipelineError::InvalidLicenseHeader(error.to_string()))?;
        let _ = headers.insert("X-License", value);
    }
    reqwest::Client::builder()
        .timeout(request_timeout)
        .default_headers(headers)
        .build()
        .map_err(PipelineError::from)
}

/// Lists every registered collector's name, one per line, to standard
/// output. Used by the `list` subcommand; registers the same illustrative
/// collectors `start` would, so the listing reflects what a real run would
/// actually schedule.
pub fn list(fake: u64) {
    let mut registry = Registry::new();
    let _ = registry.register(Box::new(FakeCollector::new(fake)));
    for name in registry.list_names() {
        println!("{name}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn effective_batch_size_falls_back_to_sender_default() {
        let config = config::Config::default();
        assert_eq!(effective_batch_size(&config), sender::DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn apply_overrides_only_touches_supplied_flags() {
        let mut config = config::Config::default();
        config.host = "configured:4242".to_string();
        let args = StartArgs { license: Some("abc".to_string()), ..Default::default() };

        apply_overrides(&mut config, &args);

        assert_eq!(config.host, "configured:4242");
        assert_eq!(config.license, "abc");
    }

    #[test]
    fn resolve_hostname_prefers_config_override() {
        let mut config = config::Config::default();
        config.hostname = "pinned-host".to_string();
        assert_eq!(&*resolve_hostname(&config), "pinned-host");
    }
}
