//! Configuration management

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS,
    DEFAULT_BURST_COOLDOWN_MS, DEFAULT_BURST_SIZE, DEFAULT_CHARGE_CONCURRENCY,
    DEFAULT_CHARGE_PAGE_DELAY_MS, DEFAULT_CUSTOMER_PAGE_DELAY_MS, DEFAULT_FORBIDDEN_COOLDOWN_SECS,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT_RUNS,
    DEFAULT_MAX_THROTTLE_RETRIES, DEFAULT_MIN_INTERVAL_MS, DEFAULT_RATE_LIMIT_COOLDOWN_SECS,
    MAX_PAGE_SIZE,
};
use crate::errors::{BillSyncError, Result};
use crate::types::Account;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub accounts: Vec<CredentialSet>,
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Credentials for `account`.
    ///
    /// # Errors
    /// Returns `BillSyncError::Config` when the account has no token.
    pub fn credentials(&self, account: Account) -> Result<&CredentialSet> {
        self.accounts.iter().find(|set| set.name == account).ok_or_else(|| {
            BillSyncError::Config(format!("no credentials configured for account '{account}'"))
        })
    }

    /// Accounts that have credentials, in configuration order.
    pub fn configured_accounts(&self) -> Vec<Account> {
        self.accounts.iter().map(|set| set.name).collect()
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `BillSyncError::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(BillSyncError::Config("database.path must not be empty".into()));
        }
        if self.accounts.is_empty() {
            return Err(BillSyncError::Config("at least one account must be configured".into()));
        }
        for set in &self.accounts {
            if set.api_token.trim().is_empty() {
                return Err(BillSyncError::Config(format!(
                    "api token for account '{}' is empty",
                    set.name
                )));
            }
        }
        if self.remote.max_attempts == 0 {
            return Err(BillSyncError::Config("remote.max_attempts must be at least 1".into()));
        }
        if self.sync.charge_concurrency == 0 || self.sync.max_concurrent_runs == 0 {
            return Err(BillSyncError::Config("sync concurrency limits must be at least 1".into()));
        }
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "billsync.db".to_string(), pool_size: 8 }
    }
}

/// Remote API and request executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Total attempts for transient failures (first try included).
    pub max_attempts: u32,
    pub page_size: u32,
    pub min_interval_ms: u64,
    /// Consecutive calls before the longer burst cooldown.
    pub burst_size: u32,
    pub burst_cooldown_ms: u64,
    pub rate_limit_cooldown_secs: u64,
    pub forbidden_cooldown_secs: u64,
    /// Throttle responses tolerated within one call before giving up.
    pub max_throttle_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub user_agent: String,
}

impl RemoteConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Page size clamped to what the remote accepts.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            page_size: MAX_PAGE_SIZE,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            burst_size: DEFAULT_BURST_SIZE,
            burst_cooldown_ms: DEFAULT_BURST_COOLDOWN_MS,
            rate_limit_cooldown_secs: DEFAULT_RATE_LIMIT_COOLDOWN_SECS,
            forbidden_cooldown_secs: DEFAULT_FORBIDDEN_COOLDOWN_SECS,
            max_throttle_retries: DEFAULT_MAX_THROTTLE_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            user_agent: concat!("billsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Named credential set for one remote account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub name: Account,
    #[serde(skip_serializing)]
    pub api_token: String,
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("name", &self.name)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub customer_page_delay_ms: u64,
    pub charge_page_delay_ms: u64,
    /// Customers whose charges are downloaded at the same time.
    pub charge_concurrency: usize,
    pub max_concurrent_runs: usize,
    /// Cron expression (six fields, seconds first) for scheduled runs.
    pub schedule: Option<String>,
    /// Accounts synced on schedule; empty means every configured account.
    pub scheduled_accounts: Vec<Account>,
    pub reconcile_on_schedule: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            customer_page_delay_ms: DEFAULT_CUSTOMER_PAGE_DELAY_MS,
            charge_page_delay_ms: DEFAULT_CHARGE_PAGE_DELAY_MS,
            charge_concurrency: DEFAULT_CHARGE_CONCURRENCY,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            schedule: None,
            scheduled_accounts: Vec::new(),
            reconcile_on_schedule: false,
        }
    }
}

/// HTTP trigger surface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".to_string() }
    }
}
