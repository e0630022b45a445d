//! The top-level error type: every way the binary can fail to start,
//! reported uniformly through one exit path in `main`.

/// Every startup-fatal error the binary can produce. Once the pipeline is
/// actually running, failures (a bad HTTP response, a collector error) are
/// handled in place and never reach this type.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Loading, validating, or converting configuration failed.
    #[error(transparent)]
    Config(#[from] config::Error),

    /// Registering a collector failed (only possible against a frozen
    /// registry, which would be a programmer error).
    #[error(transparent)]
    Collector(#[from] collector::Error),

    /// `--filter` (or the config file's `filter`) matched no registered
    /// collector.
    #[error("filter {filter:?} matches no collectors")]
    EmptyFilter {
        /// The filter terms that matched nothing.
        filter: Vec<String>,
    },

    /// Building the HTTP client failed.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Installing the global tracing subscriber failed.
    #[error("failed to install logging: {0}")]
    Logging(String),

    /// The configured license token contains bytes that aren't valid in an
    /// HTTP header value.
    #[error("license token is not a valid HTTP header value: {0}")]
    InvalidLicenseHeader(String),
}
