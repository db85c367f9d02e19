//! billsync - payment-platform mirror
//!
//! Main entry point for the `billsync` binary.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use billsync_api::cli::Cli;
use billsync_api::utils::logging::{init_tracing, log_command_execution};
use billsync_api::{commands, AppContext};
use billsync_domain::BillSyncError;
use billsync_infra::config;
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads env-backed flags
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) => tracing::debug!(error = %e, "no .env file loaded"),
    }

    let command_name = cli.command.name();
    let started = Instant::now();
    let outcome = run(cli).await;

    match outcome {
        Ok(code) => {
            log_command_execution(command_name, "cli", started.elapsed(), None);
            code
        }
        Err(e) => {
            let label = e.downcast_ref::<BillSyncError>().map_or("internal", BillSyncError::label);
            log_command_execution(command_name, "cli", started.elapsed(), Some(label));
            tracing::error!(error = %format!("{e:#}"), "billsync {command_name} failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match cli.config {
        Some(path) => config::load_from_file(Some(path))?,
        None => config::load()?,
    };

    let context = Arc::new(AppContext::new(config).await?);
    commands::execute(context, cli.command).await
}
