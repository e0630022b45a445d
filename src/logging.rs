//! Logging setup: an `EnvFilter`-driven `tracing` subscriber, with verbosity
//! resolved from (in order of precedence) `--log-level`, the `DEBUG`
//! environment variable, and a default of `info`.

use crate::error::PipelineError;

/// Installs the global tracing subscriber. `log_level` is the `--log-level`
/// flag, if given.
pub fn init(log_level: Option<&str>) -> Result<(), PipelineError> {
    let directive = log_level.map(str::to_string).unwrap_or_else(default_level);

    let filter = tracing_subscriber::EnvFilter::try_new(&directive).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| PipelineError::Logging(error.to_string()))
}

fn default_level() -> String {
    match std::env::var("DEBUG") {
        Ok(value) if !value.is_empty() => "debug".to_string(),
        _ => "info".to_string(),
    }
}
