//! CLI command handlers.
//!
//! Every handler returns the process exit code; structured results go to
//! stdout as JSON, logs go to stderr.

use std::io::Write;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use billsync_core::{annotate_customer, AnnotationChange};
use billsync_domain::{Account, BillSyncError, RunId, RunStatus, SyncRequest, SyncRun};
use billsync_infra::{SyncScheduler, SyncSchedulerConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Command;
use crate::context::AppContext;
use crate::server;

/// How long shutdown waits for background runs to close their rows.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// `triggered_by` for CLI runs when neither `--triggered-by` nor a login
/// name is available.
const CLI_TRIGGER: &str = "cli";

/// Execute one parsed command.
///
/// # Errors
/// Setup, database and remote errors; a sync run that ends `ERROR` is not
/// an error here but yields [`ExitCode::FAILURE`].
pub async fn execute(context: Arc<AppContext>, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Migrate => {
            info!(path = %context.db.path().display(), "schema is up to date");
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync { account, reconcile, missing_charges, triggered_by } => {
            let triggered_by = triggered_by.unwrap_or_else(login_name);
            let request = if missing_charges {
                SyncRequest::missing_charges(account, triggered_by)
            } else {
                SyncRequest::full(account, reconcile, triggered_by)
            };
            sync(&context, request).await
        }
        Command::Runs { limit } => {
            let runs = context.run_log.list_recent(limit.max(1)).await?;
            print_run_table(&runs)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { run_id } => {
            let id = RunId::from_str(&run_id)?;
            let run = context
                .run_log
                .get_run(&id)
                .await?
                .ok_or_else(|| BillSyncError::NotFound(format!("sync run {id}")))?;
            print_json(&run)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { account } => {
            let report = context.runner.validate(account).await?;
            print_json(&report)?;
            Ok(if report.is_consistent() { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }
        Command::Annotate { account, customer_id, handler, service_completed } => {
            annotate(&context, account, &customer_id, handler, service_completed).await
        }
        Command::Serve { bind } => serve(context, bind).await,
    }
}

async fn sync(context: &AppContext, request: SyncRequest) -> anyhow::Result<ExitCode> {
    context.close_abandoned_runs().await?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling sync run");
                cancel.cancel();
            }
        }
    });

    let outcome = context.runner.run_foreground(request, cancel).await;
    watcher.abort();

    let run = outcome.map_err(BillSyncError::from)?;
    print_json(&run)?;
    Ok(if run.status == RunStatus::Error { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn annotate(
    context: &AppContext,
    account: Account,
    customer_id: &str,
    handler: Option<String>,
    service_completed: Option<bool>,
) -> anyhow::Result<ExitCode> {
    let change = AnnotationChange { assigned_handler: handler.map(Some), service_completed };
    let customer =
        annotate_customer(context.customers.as_ref(), account, customer_id, change).await?;
    print_json(&customer)?;
    Ok(ExitCode::SUCCESS)
}

async fn serve(context: Arc<AppContext>, bind: Option<SocketAddr>) -> anyhow::Result<ExitCode> {
    context.close_abandoned_runs().await?;

    let addr = match bind {
        Some(addr) => addr,
        None => context
            .config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid server.bind '{}'", context.config.server.bind))?,
    };

    let mut scheduler = match SyncSchedulerConfig::from_config(&context.config) {
        Some(config) => {
            let mut scheduler = SyncScheduler::new(config, Arc::clone(&context.runner));
            scheduler.start().await.context("failed to start sync scheduler")?;
            Some(scheduler)
        }
        None => {
            info!("no sync schedule configured");
            None
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "trigger API listening");

    axum::serve(listener, server::router(Arc::clone(&context)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.stop().await {
            warn!(error = %e, "sync scheduler did not stop cleanly");
        }
    }
    context.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => {
            warn!(error = %e, "cannot listen for interrupts; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

fn login_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| CLI_TRIGGER.to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn print_run_table(runs: &[SyncRun]) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(
        stdout,
        "{:<36}  {:<9}  {:<15}  {:<11}  {:<18}  {:<20}  {:>9}  {:>9}",
        "RUN", "ACCOUNT", "KIND", "STATUS", "PHASE", "STARTED", "CUSTOMERS", "CHARGES"
    )?;
    for run in runs {
        writeln!(
            stdout,
            "{:<36}  {:<9}  {:<15}  {:<11}  {:<18}  {:<20}  {:>9}  {:>9}",
            run.id.to_string(),
            run.account.as_str(),
            run.kind.as_str(),
            run.status.as_str(),
            run.phase.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            run.customers.seen,
            run.charges.seen,
        )?;
    }
    Ok(())
}
