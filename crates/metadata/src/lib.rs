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

//! The metadata publisher: periodically POSTs the metric-meta catalog to a
//! sidecar URL, entirely separate from the data pipeline. There is no
//! queue here — a failed POST is simply logged and retried on the next
//! tick, and the data pipeline keeps running regardless of this task's
//! fate.

use std::time::Duration;

use model::MetaCatalog;
use signal::ShutdownHandle;

/// The default publication interval (hourly).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Runs until `shutdown` trips, POSTing a snapshot of `catalog` as a JSON
/// array to `url` every `interval`. The first publish happens after the
/// first interval elapses, not immediately at startup.
pub async fn run(catalog: MetaCatalog, url: String, interval: Duration, client: reqwest::Client, mut shutdown: ShutdownHandle) {
    loop {
        if shutdown.sleep_or_signalled(interval).await {
            break;
        }
        let snapshot = catalog.snapshot();
        if snapshot.is_empty() {
            continue;
        }
        match publish(&client, &url, &snapshot).await {
            Ok(()) => tracing::debug!(count = snapshot.len(), "published metric metadata"),
            Err(error) => tracing::warn!(%error, "metadata publish failed, will retry next tick"),
        }
    }
    tracing::debug!("metadata publisher exiting");
}

async fn publish(client: &reqwest::Client, url: &str, snapshot: &[model::MetaRecord]) -> Result<(), reqwest::Error> {
    let _response = client.post(url).json(snapshot).send().await?.error_for_status()?;
    Ok(())
}
