//! Application constants
//!
//! Centralized location for domain-level constants shared by the sync engine
//! and its adapters.

// Remote platform
pub const DEFAULT_API_BASE_URL: &str = "https://api.asaas.com/v3";
pub const ACCESS_TOKEN_HEADER: &str = "access_token";
pub const MAX_PAGE_SIZE: u32 = 100;
pub const CUSTOMERS_ENDPOINT: &str = "customers";
pub const CHARGES_ENDPOINT: &str = "payments";

// Executor defaults
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 200;
pub const DEFAULT_BURST_SIZE: u32 = 50;
pub const DEFAULT_BURST_COOLDOWN_MS: u64 = 5_000;
pub const DEFAULT_RATE_LIMIT_COOLDOWN_SECS: u64 = 10;
pub const DEFAULT_FORBIDDEN_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

// Fetcher / orchestrator defaults
pub const DEFAULT_CUSTOMER_PAGE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_CHARGE_PAGE_DELAY_MS: u64 = 500;
pub const DEFAULT_CHARGE_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 2;

// Run log
pub const DEFAULT_RUN_LIST_LIMIT: u32 = 20;
pub const SCHEDULER_TRIGGER: &str = "scheduler";
pub const ABANDONED_RUN_REASON: &str = "run abandoned: process exited before completion";
