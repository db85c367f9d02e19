//! # billsync Core
//!
//! Sync engine business logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for the remote platform, local repositories
//!   and the run log
//! - The paginated fetcher, upsert synchronizer and reconciler
//! - The sync orchestrator driving them through one run
//!
//! ## Architecture Principles
//! - Only depends on `billsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod sync;

pub use sync::annotations::{annotate_customer, AnnotationChange};
pub use sync::fetcher::{FetchSettings, Listing, PaginatedFetcher};
pub use sync::orchestrator::{RunHandle, SyncOrchestrator, SyncSettings};
pub use sync::ports::{
    ChargeRepository, CustomerRepository, RemoteSource, RemovalCounts, SyncRunLog, UpsertOutcome,
};
pub use sync::reconciler::{ReconcileOutcome, Reconciler, RemoteIdSet};
pub use sync::synchronizer::{SyncOutcome, UpsertSynchronizer};
