//! `collector`: a host-monitoring agent. Samples collectors on a fixed
//! cadence, queues and batches their points, and ships them to a
//! time-series database over HTTP.

mod cli;
mod error;
mod logging;
mod pipeline;

use clap::Parser;
use cli::{Cli, Command};
use error::PipelineError;
use mimalloc_rust::GlobalMiMalloc;

#[global_allocator]
static GLOBAL_MIMALLOC: GlobalMiMalloc = GlobalMiMalloc;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    color_eyre::install().expect("failed to install panic/error report handler");

    let cli = Cli::parse();
    if let Err(error) = logging::init(cli.log_level.as_deref()) {
        eprintln!("failed to initialize logging: {error}");
        return std::process::ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), PipelineError> {
    match command {
        Command::List => {
            pipeline::list(0);
            Ok(())
        }
        Command::Utils { conf, totoml } => config::convert_legacy(&conf, &totoml).map_err(PipelineError::from),
        Command::Start(args) => pipeline::run(args).await,
    }
}
