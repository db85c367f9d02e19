//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Required:
//! - `BILLSYNC_DB_PATH`: Database file path
//! - `BILLSYNC_PRIMARY_TOKEN` and/or `BILLSYNC_ALTERNATE_TOKEN`: API tokens
//!
//! Optional (defaults from [`Config::default`]):
//! - `BILLSYNC_DB_POOL_SIZE`, `BILLSYNC_API_URL`, `BILLSYNC_HTTP_TIMEOUT_SECS`,
//!   `BILLSYNC_MAX_ATTEMPTS`, `BILLSYNC_PAGE_SIZE`, `BILLSYNC_MIN_INTERVAL_MS`,
//!   `BILLSYNC_CHARGE_CONCURRENCY`, `BILLSYNC_SYNC_CRON`, `BILLSYNC_BIND`
//!
//! ## File Locations
//! The loader probes `config.toml`, `config.json`, `billsync.toml` and
//! `billsync.json` in the working directory, its two parents, and next to
//! the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use billsync_domain::{Account, BillSyncError, Config, CredentialSet, Result};

const CONFIG_FILE_NAMES: [&str; 4] =
    ["config.toml", "config.json", "billsync.toml", "billsync.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `BillSyncError::Config` if no source yields a valid configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "environment configuration incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `BillSyncError::Config` if required variables are missing or any
/// variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.database.path = env_var("BILLSYNC_DB_PATH")?;

    for (account, key) in
        [(Account::Primary, "BILLSYNC_PRIMARY_TOKEN"), (Account::Alternate, "BILLSYNC_ALTERNATE_TOKEN")]
    {
        if let Some(token) = env_opt(key) {
            config.accounts.push(CredentialSet { name: account, api_token: token });
        }
    }
    if config.accounts.is_empty() {
        return Err(BillSyncError::Config(
            "Missing required environment variable: BILLSYNC_PRIMARY_TOKEN or BILLSYNC_ALTERNATE_TOKEN"
                .into(),
        ));
    }

    if let Some(size) = env_parse("BILLSYNC_DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }
    if let Some(url) = env_opt("BILLSYNC_API_URL") {
        config.remote.base_url = url;
    }
    if let Some(secs) = env_parse("BILLSYNC_HTTP_TIMEOUT_SECS")? {
        config.remote.timeout_secs = secs;
    }
    if let Some(attempts) = env_parse("BILLSYNC_MAX_ATTEMPTS")? {
        config.remote.max_attempts = attempts;
    }
    if let Some(size) = env_parse("BILLSYNC_PAGE_SIZE")? {
        config.remote.page_size = size;
    }
    if let Some(ms) = env_parse("BILLSYNC_MIN_INTERVAL_MS")? {
        config.remote.min_interval_ms = ms;
    }
    if let Some(concurrency) = env_parse("BILLSYNC_CHARGE_CONCURRENCY")? {
        config.sync.charge_concurrency = concurrency;
    }
    config.sync.schedule = env_opt("BILLSYNC_SYNC_CRON");
    if let Some(bind) = env_opt("BILLSYNC_BIND") {
        config.server.bind = bind;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `BillSyncError::Config` if the file is missing, cannot be parsed,
/// or fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(BillSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            BillSyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| BillSyncError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| BillSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| BillSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(BillSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.clone());
        roots.push(cwd.join(".."));
        roots.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    env_opt(key).ok_or_else(|| {
        BillSyncError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Set and non-blank value of `key`.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| BillSyncError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}
