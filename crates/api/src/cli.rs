use std::net::SocketAddr;
use std::path::PathBuf;

use billsync_domain::constants::DEFAULT_RUN_LIST_LIMIT;
use billsync_domain::Account;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "billsync", version, about = "Mirror payment-platform customers and charges into SQLite")]
pub struct Cli {
    /// Config file (TOML or JSON); without it the environment is tried first
    #[arg(long, global = true, env = "BILLSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write logs as JSON lines
    #[arg(long, global = true, env = "BILLSYNC_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create or upgrade the local schema
    Migrate,
    /// Run one sync in the foreground (Ctrl-C cancels)
    Sync {
        #[arg(long, value_parser = parse_account)]
        account: Account,
        /// Delete local records the platform no longer lists
        #[arg(long, conflicts_with = "missing_charges")]
        reconcile: bool,
        /// Only download charges for customers already stored
        #[arg(long)]
        missing_charges: bool,
        /// Recorded on the run row; defaults to the current user
        #[arg(long)]
        triggered_by: Option<String>,
    },
    /// List recent runs
    Runs {
        #[arg(long, default_value_t = DEFAULT_RUN_LIST_LIMIT)]
        limit: u32,
    },
    /// Show one run
    Status {
        run_id: String,
    },
    /// Compare local counts with the platform's totals
    Validate {
        #[arg(long, value_parser = parse_account)]
        account: Account,
    },
    /// Set local-only annotations on a stored customer
    Annotate {
        #[arg(long, value_parser = parse_account)]
        account: Account,
        /// Remote customer id (e.g. cus_000005219613)
        customer_id: String,
        /// Assigned handler; an empty value clears it
        #[arg(long)]
        handler: Option<String>,
        #[arg(long, action = ArgAction::Set)]
        service_completed: Option<bool>,
    },
    /// Serve the HTTP trigger API and the cron schedule until Ctrl-C
    Serve {
        /// Overrides `server.bind`
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

impl Command {
    /// Stable name used in command timing logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::Sync { .. } => "sync",
            Self::Runs { .. } => "runs",
            Self::Status { .. } => "status",
            Self::Validate { .. } => "validate",
            Self::Annotate { .. } => "annotate",
            Self::Serve { .. } => "serve",
        }
    }
}

fn parse_account(value: &str) -> Result<Account, String> {
    value.parse().map_err(|e: billsync_domain::BillSyncError| e.to_string())
}
