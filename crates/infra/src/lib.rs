//! # billsync Infrastructure
//!
//! Infrastructure implementations of the core sync ports.
//!
//! This crate contains:
//! - SQLite repositories for the mirror and the run log
//! - The HTTP request executor (retries, throttling, cooldowns)
//! - The Asaas REST client implementing `RemoteSource`
//! - Configuration loading
//! - The job runner and the cron scheduler
//!
//! ## Architecture
//! - Implements traits defined in `billsync-core`
//! - Contains all "impure" code (database, network, timers)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod scheduling;

pub use database::{
    DbManager, SqliteChargeRepository, SqliteCustomerRepository, SqliteSyncRunRepository,
};
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder};
pub use integrations::AsaasClient;
pub use scheduling::{JobError, SyncJobRunner, SyncScheduler, SyncSchedulerConfig};
