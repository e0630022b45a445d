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

//! The pipeline's TOML-loaded [`Config`], CLI-override merging, and the
//! legacy `key=value` converter behind the `utils --totoml` subcommand.
//!
//! Every field mirrors one the source agent accepted from its own TOML
//! file: `host` and `sched_host` are URLs (a bare `host:port` is accepted
//! and given an `http://` scheme, matching the source's `parseHost`),
//! `tags` is the base tag set merged into every emitted point, and
//! `freq`/`memory_ceiling_mb` carry the pipeline's defaults. The CLI layer
//! overlays its own flags on top of a loaded (or default) `Config` --
//! `Config` itself never reads `std::env` or argv.

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

/// All the errors that can occur while loading, validating, or converting
/// pipeline configuration. Every variant here is `ConfigInvalid` in the
/// pipeline's error taxonomy: fatal at startup, never encountered once the
/// pipeline is running.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configuration file could not be read.
    #[error("failed to read configuration file `{path}`: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file's contents are not valid TOML, or contain a
    /// field with the wrong shape.
    #[error("failed to parse configuration file `{path}` as TOML: {source}")]
    Toml {
        /// The path that failed to parse.
        path: String,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// The `[tags]` table set the reserved `host` key. The pipeline injects
    /// `host` itself; a custom base tag set is not allowed to.
    #[error("the 'host' tag is reserved and injected by the pipeline; do not set it under [tags]")]
    ReservedHostTag,

    /// A tag under `[tags]` failed the shared tag validation pattern.
    #[error("invalid base tag (key: {key}, value: {value}): {reason}")]
    InvalidTag {
        /// The offending tag key.
        key: String,
        /// The offending tag value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `freq` was zero or negative.
    #[error("freq must be greater than 0 seconds (got {freq})")]
    InvalidFreq {
        /// The offending value.
        freq: i64,
    },

    /// `host` (or `sched_host`) could not be parsed as a URL even after
    /// prepending a default scheme.
    #[error("invalid host URL `{host}`: {reason}")]
    InvalidHost {
        /// The offending host string.
        host: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A line in a legacy `key=value` config file wasn't `key=value`.
    #[error("legacy config line {line} in `{path}` is not `key=value`")]
    LegacyMalformedLine {
        /// The file being converted.
        path: String,
        /// The 1-based line number.
        line: usize,
    },

    /// A legacy config line used a key outside the set this converter
    /// understands (`host`, `hostname`, `filter`, `tags`, `freq`).
    /// Per-collector keys (`snmp`, `coldir`, `process`, ...) are out of the
    /// pipeline's core scope and are rejected rather than silently dropped.
    #[error("unknown legacy config key `{key}` at {path}:{line}")]
    LegacyUnknownKey {
        /// The offending key.
        key: String,
        /// The file being converted.
        path: String,
        /// The 1-based line number.
        line: usize,
    },

    /// The converted TOML document could not be serialized.
    #[error("failed to encode converted configuration as TOML: {0}")]
    EncodeToml(#[from] toml::ser::Error),

    /// The converted TOML document could not be written to disk.
    #[error("failed to write converted configuration to `{path}`: {source}")]
    WriteToml {
        /// The destination path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn default_freq() -> u64 {
    10
}

fn default_memory_ceiling_mb() -> u64 {
    500
}

/// The pipeline-level configuration every binary accepts: the ingest URL,
/// the metadata sidecar URL, the collector filter, the base tag set, and
/// the handful of operational knobs (batch size, print mode, memory
/// ceiling, self-telemetry).
///
/// Loaded from TOML with [`Config::load`] or [`Config::load_or_default`];
/// individual fields are then overridable by CLI flags at the call site
/// (the CLI value wins when both are set, see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The OpenTSDB-compatible ingest URL data points are POSTed to. A bare
    /// `host:port` is accepted and given an `http://` scheme.
    pub host: String,

    /// The metadata sidecar URL the metric-meta catalog is POSTed to. A bare
    /// `host:port` is accepted and given an `http://` scheme.
    pub sched_host: String,

    /// Overrides the canonical hostname resolved at startup, if non-empty.
    pub hostname: String,

    /// An opaque token sent as the `X-License` header on every outbound
    /// request, if non-empty.
    pub license: String,

    /// Collector name substrings the registry is searched with. Empty
    /// matches every enabled collector.
    pub filter: Vec<String>,

    /// The default collector sampling interval, in seconds.
    #[serde(default = "default_freq")]
    pub freq: u64,

    /// The maximum number of points drained into a single batch. Zero means
    /// "use the sender's built-in default" (500).
    pub batch_size: usize,

    /// When set, the sender writes points as JSON lines to standard output
    /// instead of performing any HTTP I/O.
    pub print: bool,

    /// The base tag set merged into every emitted point, in addition to the
    /// pipeline-injected `host` tag. Must not set `host` itself.
    pub tags: BTreeMap<String, String>,

    /// Disables the self-telemetry collector when set.
    pub disable_self_telemetry: bool,

    /// A `host:port` bind address for the debug endpoint, if set.
    pub pprof: Option<String>,

    /// The hard resident-memory ceiling, in megabytes, past which the
    /// process aborts.
    #[serde(default = "default_memory_ceiling_mb")]
    pub memory_ceiling_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            sched_host: String::new(),
            hostname: String::new(),
            license: String::new(),
            filter: Vec::new(),
            freq: default_freq(),
            batch_size: 0,
            print: false,
            tags: BTreeMap::new(),
            disable_self_telemetry: false,
            pprof: None,
            memory_ceiling_mb: default_memory_ceiling_mb(),
        }
    }
}

impl Config {
    /// Loads and validates a `Config` from a TOML file at `path`. Fails if
    /// the file does not exist, isn't valid TOML, or fails validation (see
    /// [`Config::validate`]).
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        let config: Config = toml::from_str(&text).map_err(|source| Error::Toml { path: path.display().to_string(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a `Config` from `path` if given and the file exists, otherwise
    /// returns [`Config::default`]. A path that is explicitly given but
    /// missing is still an error -- only the "no path given" case falls
    /// back silently, matching the source agent's "conf file is optional
    /// unless named on the command line" behavior.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Validates `freq` and the base tag set. Called automatically by
    /// [`Config::load`]; exposed so the CLI layer can re-validate after
    /// applying its own overrides.
    pub fn validate(&self) -> Result<(), Error> {
        if self.freq == 0 {
            return Err(Error::InvalidFreq { freq: 0 });
        }
        let _ = self.base_tags()?;
        Ok(())
    }

    /// Builds the validated [`model::TagSet`] for `tags`, rejecting an
    /// explicit `host` key (the pipeline injects it) and any key or value
    /// failing the shared tag pattern.
    pub fn base_tags(&self) -> Result<model::TagSet, Error> {
        if self.tags.contains_key(model::tagset::HOST_TAG) {
            return Err(Error::ReservedHostTag);
        }
        let mut tags = model::TagSet::new();
        for (key, value) in &self.tags {
            tags.insert(key.clone(), value.clone()).map_err(|error| Error::InvalidTag {
                key: key.clone(),
                value: value.clone(),
                reason: error.to_string(),
            })?;
        }
        Ok(tags)
    }

    /// Returns `host`, normalized to carry an explicit scheme (`http://` is
    /// assumed for a bare `host:port`), or `None` if `host` is empty.
    pub fn ingest_url(&self) -> Result<Option<String>, Error> {
        normalize_host(&self.host)
    }

    /// Returns `sched_host`, normalized the same way as [`Config::ingest_url`].
    pub fn metadata_url(&self) -> Result<Option<String>, Error> {
        normalize_host(&self.sched_host)
    }
}

/// Prepends `http://` to `host` if it carries no scheme, matching the
/// source agent's `parseHost`. Returns `None` for an empty string (meaning
/// "not configured").
fn normalize_host(host: &str) -> Result<Option<String>, Error> {
    if host.is_empty() {
        return Ok(None);
    }
    let with_scheme = if host.contains("//") { host.to_string() } else { format!("http://{host}") };
    match url::Url::parse(&with_scheme) {
        Ok(url) if url.host_str().is_some() => Ok(Some(with_scheme)),
        Ok(_) => Err(Error::InvalidHost { host: host.to_string(), reason: "no host specified".to_string() }),
        Err(error) => Err(Error::InvalidHost { host: host.to_string(), reason: error.to_string() }),
    }
}

/// Converts a legacy `key=value`-per-line configuration file at `input`
/// into an equivalent TOML document written to `output`, matching the
/// `utils --conf IN --totoml OUT` CLI contract.
///
/// Recognized keys: `host`, `hostname`, `filter` (comma-separated),
/// `tags` (comma-separated `k=v` pairs), `freq` (integer seconds). Any
/// other key is a hard parse error -- per-collector legacy keys (`snmp`,
/// `coldir`, `process`, ...) are out of the pipeline's core scope.
pub fn convert_legacy(input: &Path, output: &Path) -> Result<(), Error> {
    let text = fs::read_to_string(input).map_err(|source| Error::Io { path: input.display().to_string(), source })?;
    let path = input.display().to_string();
    let mut config = Config::default();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::LegacyMalformedLine { path: path.clone(), line: index + 1 })?;
        let key = key.trim();
        let value = value.trim();

        match key {
            "host" => config.host = value.to_string(),
            "hostname" => config.hostname = value.to_string(),
            "filter" => config.filter = value.split(',').map(str::trim).map(str::to_string).collect(),
            "tags" => config.tags = parse_legacy_tags(value),
            "freq" => {
                config.freq = value
                    .parse()
                    .map_err(|_| Error::LegacyMalformedLine { path: path.clone(), line: index + 1 })?
            }
            other => {
                return Err(Error::LegacyUnknownKey { key: other.to_string(), path: path.clone(), line: index + 1 });
            }
        }
    }

    config.validate()?;
    let encoded = toml::to_string_pretty(&config)?;
    fs::write(output, encoded).map_err(|source| Error::WriteToml { path: output.display().to_string(), source })
}

/// Parses the legacy `k=v,k2=v2` tag string into a map, ignoring empty
/// entries (matching `opentsdb.ParseTags`' tolerance of trailing commas).
fn parse_legacy_tags(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.freq, 10);
        assert_eq!(config.memory_ceiling_mb, 500);
    }

    #[test]
    fn rejects_zero_freq() {
        let mut config = Config::default();
        config.freq = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidFreq { .. })));
    }

    #[test]
    fn rejects_reserved_host_tag() {
        let mut config = Config::default();
        let _ = config.tags.insert("host".to_string(), "spoofed".to_string());
        assert!(matches!(config.validate(), Err(Error::ReservedHostTag)));
    }

    #[test]
    fn rejects_invalid_tag_value() {
        let mut config = Config::default();
        let _ = config.tags.insert("env".to_string(), "bad value!".to_string());
        assert!(matches!(config.validate(), Err(Error::InvalidTag { .. })));
    }

    #[test]
    fn ingest_url_defaults_bare_host_to_http() {
        let mut config = Config::default();
        config.host = "tsdb.internal:4242".to_string();
        assert_eq!(config.ingest_url().unwrap(), Some("http://tsdb.internal:4242".to_string()));
    }

    #[test]
    fn ingest_url_preserves_explicit_scheme() {
        let mut config = Config::default();
        config.host = "https://tsdb.internal:4242".to_string();
        assert_eq!(config.ingest_url().unwrap(), Some("https://tsdb.internal:4242".to_string()));
    }

    #[test]
    fn ingest_url_is_none_when_host_is_empty() {
        assert_eq!(Config::default().ingest_url().unwrap(), None);
    }

    #[test]
    fn load_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("collector.toml");
        fs::write(&path, "host = \"tsdb:4242\"\nfreq = 30\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.host, "tsdb:4242");
        assert_eq!(config.freq, 30);
    }

    #[test]
    fn load_or_default_falls_back_when_no_path_given() {
        let config = Config::load_or_default(None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_or_default_propagates_error_for_missing_explicit_path() {
        let missing = Path::new("/nonexistent/collector.toml");
        assert!(matches!(Config::load_or_default(Some(missing)), Err(Error::Io { .. })));
    }

    #[test]
    fn convert_legacy_round_trips_recognized_keys() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("legacy.conf");
        let output = dir.path().join("converted.toml");
        fs::write(&input, "host=tsdb:4242\nfilter=cpu,mem\ntags=env=prod,dc=us1\nfreq=15\n").unwrap();

        convert_legacy(&input, &output).unwrap();

        let converted = Config::load(&output).unwrap();
        assert_eq!(converted.host, "tsdb:4242");
        assert_eq!(converted.filter, vec!["cpu".to_string(), "mem".to_string()]);
        assert_eq!(converted.freq, 15);
        assert_eq!(converted.tags.get("env"), Some(&"prod".to_string()));
        assert_eq!(converted.tags.get("dc"), Some(&"us1".to_string()));
    }

    #[test]
    fn convert_legacy_rejects_unknown_key() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("legacy.conf");
        let output = dir.path().join("converted.toml");
        fs::write(&input, "snmp=public@127.0.0.1\n").unwrap();

        assert!(matches!(convert_legacy(&input, &output), Err(Error::LegacyUnknownKey { .. })));
    }

    #[test]
    fn convert_legacy_rejects_malformed_line() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("legacy.conf");
        let output = dir.path().join("converted.toml");
        fs::write(&input, "not-a-key-value-line\n").unwrap();

        assert!(matches!(convert_legacy(&input, &output), Err(Error::LegacyMalformedLine { .. })));
    }
}
