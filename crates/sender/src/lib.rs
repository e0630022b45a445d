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

//! The batcher/sender: the single task that drains the bounded queue,
//! gzips batches of up to `batch_size` points, and POSTs them to the
//! ingest URL. Failure (transport error or any status other than 204)
//! re-enqueues the whole batch at the head of the queue and sleeps 5s
//! before the next attempt; an empty queue sleeps 1s. In "print mode" the
//! sender bypasses HTTP entirely and writes each point as a line of JSON to
//! a sink, treating every emission as a success.

use std::{
    io::Write,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use model::DataPoint;
use queue::BoundedQueue;
use signal::ShutdownHandle;
use tracing::{debug, error, warn};

/// The default number of points drained into a single batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

const EMPTY_QUEUE_SLEEP: Duration = Duration::from_secs(1);
const RETRY_SLEEP: Duration = Duration::from_secs(5);

/// Errors a single send attempt can fail with. Every variant is handled
/// identically by [`Sender::run`]: re-enqueue at head, sleep, retry.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Serializing or gzip-encoding the batch failed.
    #[error("failed to encode batch: {0}")]
    Encode(String),

    /// The HTTP request itself failed (DNS, connect, timeout, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server responded with something other than 204 No Content. Any
    /// other 2xx is deliberately treated as a failure: silent acceptance
    /// without an explicit 204 confirmation is not trusted.
    #[error("unexpected response status {status} (body: {body})")]
    UnexpectedStatus {
        /// The HTTP status code received.
        status: u16,
        /// The response body, if any, for diagnostics.
        body: String,
    },
}

/// Where a [`Sender`] delivers batches.
enum Destination {
    /// POST gzip-compressed JSON to `url`, with an optional license header.
    Http { client: reqwest::Client, url: String, license: Option<String> },
    /// Write each point as one line of JSON to `sink`, always succeeding.
    Print { sink: Arc<Mutex<dyn Write + Send>> },
}

/// Cumulative counters the sender exposes to self-telemetry.
#[derive(Clone, Default)]
pub struct SenderStats {
    sent: Arc<AtomicU64>,
}

impl SenderStats {
    /// The cumulative number of points successfully transmitted.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// The batcher/sender task.
pub struct Sender {
    queue: Arc<BoundedQueue>,
    destination: Destination,
    batch_size: usize,
    output: flume::Sender<DataPoint>,
    hostname: Arc<str>,
    stats: SenderStats,
}

impl Sender {
    /// Creates a sender that POSTs gzip-compressed batches to `ingest_url`.
    /// `request_timeout` bounds each HTTP request, ordinarily the pipeline's
    /// shutdown grace deadline.
    pub fn http(
        queue: Arc<BoundedQueue>,
        ingest_url: String,
        license: Option<String>,
        batch_size: usize,
        request_timeout: Duration,
        output: flume::Sender<DataPoint>,
        hostname: Arc<str>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            queue,
            destination: Destination::Http { client, url: ingest_url, license },
            batch_size,
            output,
            hostname,
            stats: SenderStats::default(),
        }
    }

    /// Creates a sender that writes each point as a JSON line to `sink`
    /// instead of performing any network I/O ("print mode").
    pub fn print(
        queue: Arc<BoundedQueue>,
        batch_size: usize,
        sink: Arc<Mutex<dyn Write + Send>>,
        output: flume::Sender<DataPoint>,
        hostname: Arc<str>,
    ) -> Self {
        Self {
            queue,
            destination: Destination::Print { sink },
            batch_size,
            output,
            hostname,
            stats: SenderStats::default(),
        }
    }

    /// Returns a cheap handle to this sender's counters, to be shared with
    /// self-telemetry.
    pub fn stats(&self) -> SenderStats {
        self.stats.clone()
    }

    /// Runs the drain/send/retry loop until `shutdown` trips.
    pub async fn run(&self, mut shutdown: ShutdownHandle) {
        loop {
            if shutdown.is_signalled() {
                break;
            }

            let batch = self.queue.drain(self.batch_size);
            if batch.is_empty() {
                if shutdown.sleep_or_signalled(EMPTY_QUEUE_SLEEP).await {
                    break;
                }
                continue;
            }

            let batch_len = batch.len();
            let started = std::time::Instant::now();
            let result = self.send(&batch).await;
            let elapsed_ms = started.elapsed().as_millis() as i64;

            self.emit_self_metric("collect.post.batchsize", batch_len as i64);
            self.emit_self_metric("collect.post.duration", elapsed_ms);

            match result {
                Ok(()) => {
                    let _ = self.stats.sent.fetch_add(batch_len as u64, Ordering::Relaxed);
                    debug!(batch_len, elapsed_ms, "batch sent");
                }
                Err(error) => {
                    error!(%error, batch_len, "batch send failed, re-enqueuing at head and backing off");
                    self.queue.requeue_front(batch);
                    if shutdown.sleep_or_signalled(RETRY_SLEEP).await {
                        break;
                    }
                }
            }
        }
        debug!("sender exiting");
    }

    /// Makes a single send attempt for `batch`, without the retry/backoff
    /// loop `run` wraps around it. Exposed publicly so callers (and tests)
    /// can drive individual attempts directly rather than waiting through
    /// `run`'s real retry backoff.
    pub async fn send(&self, batch: &[DataPoint]) -> Result<(), Error> {
        match &self.destination {
            Destination::Http { client, url, license } => send_http(client, url, license.as_deref(), batch).await,
            Destination::Print { sink } => {
                let mut sink = sink.lock().expect("print sink lock poisoned");
                for point in batch {
                    let line = serde_json::to_string(point).map_err(|e| Error::Encode(e.to_string()))?;
                    writeln!(sink, "{line}").map_err(|e| Error::Encode(e.to_string()))?;
                }
                Ok(())
            }
        }
    }

    fn emit_self_metric(&self, metric: &str, value: i64) {
        let point = match DataPoint::new(metric, now_secs(), value, model::TagSet::new()) {
            Ok(point) => point.with_host(&self.hostname),
            Err(error) => {
                warn!(%error, metric, "failed to build self-telemetry point");
                return;
            }
        };
        // Best-effort: never block waiting on the ingest channel.
        let _ = self.output.try_send(point);
    }
}

async fn send_http(
    client: &reqwest::Client,
    url: &str,
    license: Option<&str>,
    batch: &[DataPoint],
) -> Result<(), Error> {
    let body = gzip_encode(batch)?;

    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "gzip");
    if let Some(license) = license {
        request = request.header("X-License", license);
    }

    let response = request.body(body).send().await?;
    let status = response.status();
    if status.as_u16() == 204 {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::UnexpectedStatus { status: status.as_u16(), body })
}

fn gzip_encode(batch: &[DataPoint]) -> Result<Vec<u8>, Error> {
    use flate2::{write::GzEncoder, Compression};
    let json = serde_json::to_vec(batch).map_err(|e| Error::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(|e| Error::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Encode(e.to_string()))
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use model::TagSet;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn point(n: i64) -> DataPoint {
        DataPoint::new("test.metric", n, n, TagSet::new()).unwrap()
    }

    #[tokio::test]
    async fn successful_send_drains_and_counts_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/put"))
            .and(header("Content-Encoding", "gzip"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let queue = Arc::new(BoundedQueue::new(10));
        for i in 0..5 {
            assert!(queue.push(point(i)));
        }
        let (tx, _rx) = flume::unbounded();
        let sender = Sender::http(
            queue.clone(),
            format!("{}/put", server.uri()),
            None,
            500,
            Duration::from_secs(5),
            tx,
            Arc::from("host01"),
        );

        let (shutdown, handle) = signal::channel();
        let run = tokio::spawn(async move { sender.run(handle).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(1), run).await;

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_send_requeues_batch_at_head() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let queue = Arc::new(BoundedQueue::new(10));
        assert!(queue.push(point(1)));
        assert!(queue.push(point(2)));
        let (tx, _rx) = flume::unbounded();
        let sender = Sender::http(
            queue.clone(),
            format!("{}/put", server.uri()),
            None,
            500,
            Duration::from_secs(1),
            tx,
            Arc::from("host01"),
        );

        // Drive a single iteration manually rather than spawning the retry
        // loop, so the requeue is observed before the 5s backoff sleep.
        let batch = queue.drain(500);
        assert_eq!(batch.len(), 2);
        let result = sender.send(&batch).await;
        assert!(result.is_err());
        queue.requeue_front(batch);

        let requeued = queue.drain(500);
        assert_eq!(requeued.iter().map(|p| p.timestamp).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn print_mode_writes_one_json_line_per_point() {
        let queue = Arc::new(BoundedQueue::new(10));
        assert!(queue.push(point(1)));
        assert!(queue.push(point(2)));

        let concrete: Arc<Mutex<Cursor<Vec<u8>>>> = Arc::new(Mutex::new(Cursor::new(Vec::new())));
        let sink: Arc<Mutex<dyn Write + Send>> = concrete.clone();
        let (tx, _rx) = flume::unbounded();
        let sender = Sender::print(queue.clone(), 500, sink, tx, Arc::from("host01"));

        let batch = queue.drain(500);
        sender.send(&batch).await.unwrap();

        let written = concrete.lock().unwrap().get_ref().clone();
        let text = String::from_utf8(written).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DataPoint = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.timestamp, 1);
    }

    #[test]
    fn gzip_roundtrips_through_deserialization() {
        let batch = vec![point(1), point(2), point(3)];
        let compressed = gzip_encode(&batch).unwrap();

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut decompressed = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut decompressed).unwrap();
        let back: Vec<DataPoint> = serde_json::from_str(&decompressed).unwrap();
        assert_eq!(back, batch);
    }
}
