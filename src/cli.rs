//! The command-line surface: `list`, `utils --conf --totoml`, and `start`.
//!
//! Flag names and short forms mirror the source agent's own flags
//! (`-H/--host`, `-S/--schedhost`, `-L/--license`, `-I/--filter`,
//! `-P/--print`, `-B/--batchsize`, `-F/--fake`, `-M/--dismetadata`,
//! `-C/--conf`) so an operator's existing invocation keeps working.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "collector", version, about = "Samples host and application metrics and ships them to a time-series database.")]
pub struct Cli {
    /// Logging verbosity (error, warn, info, debug, trace). Overrides the
    /// `DEBUG` environment variable, which in turn defaults logging to
    /// `debug` when set to any non-empty value.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Lists every registered collector, one name per line.
    List,

    /// Converts a legacy `key=value` configuration file to TOML.
    Utils {
        /// The legacy configuration file to read.
        #[arg(short = 'C', long)]
        conf: PathBuf,

        /// The TOML file to write.
        #[arg(short = 'T', long)]
        totoml: PathBuf,
    },

    /// Starts the pipeline: schedules collectors, batches their points, and
    /// ships them to the configured ingest URL.
    Start(StartArgs),
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// A TOML configuration file. Optional; a missing `--conf` falls back to
    /// built-in defaults, but an explicitly named file that doesn't exist is
    /// an error.
    #[arg(short = 'C', long)]
    pub conf: Option<PathBuf>,

    /// The ingest URL data points are POSTed to. Overrides `host` in the
    /// config file.
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// The metadata sidecar URL. Overrides `sched_host` in the config file.
    #[arg(short = 'S', long)]
    pub schedhost: Option<String>,

    /// The `X-License` header value. Overrides `license` in the config file.
    #[arg(short = 'L', long)]
    pub license: Option<String>,

    /// Comma-separated collector name substrings. Overrides `filter` in the
    /// config file.
    #[arg(short = 'I', long, value_delimiter = ',')]
    pub filter: Option<Vec<String>>,

    /// Writes points as JSON lines to standard output instead of performing
    /// any HTTP I/O. Overrides `print` in the config file.
    #[arg(short = 'P', long)]
    pub print: bool,

    /// The maximum number of points drained into a single batch. Overrides
    /// `batch_size` in the config file.
    #[arg(short = 'B', long)]
    pub batchsize: Option<usize>,

    /// Registers the synthetic `fake` collector, emitting this many points
    /// per tick. Zero (the default) leaves it disabled.
    #[arg(short = 'F', long, default_value_t = 0)]
    pub fake: u64,

    /// Disables the metadata publisher task entirely. This is distinct from
    /// `disable_self_telemetry` in the config file, which only disables the
    /// self-telemetry collector; this flag is CLI-only.
    #[arg(short = 'M', long)]
    pub dismetadata: bool,
}
