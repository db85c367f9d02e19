//! Port interfaces for sync operations

use async_trait::async_trait;
use billsync_domain::{
    Account, Charge, ChargeKey, ChargeUpsert, Customer, CustomerAnnotations, CustomerUpsert,
    NewSyncRun, Page, PageRequest, RemoteCharge, RemoteCustomer, Result, RunCompletion, RunId,
    SyncRun,
};

/// Read access to the remote payment platform for one account
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// List one page of customers
    async fn list_customers(&self, page: PageRequest) -> Result<Page<RemoteCustomer>>;

    /// List one page of charges, optionally restricted to one customer
    async fn list_charges(
        &self,
        customer_external_id: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<RemoteCharge>>;
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// The row already held exactly these fields; only `synced_at` moved.
    Unchanged,
}

/// Rows deleted by a reconciliation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalCounts {
    pub customers: u64,
    pub charges: u64,
}

/// Trait for storing mirrored customers
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Local row id for a remote customer, `None` when it is not stored
    async fn find_local_id(&self, account: Account, external_id: &str) -> Result<Option<i64>>;

    /// Create or update the remote-owned fields, leaving annotations alone
    async fn upsert(&self, customer: &CustomerUpsert) -> Result<UpsertOutcome>;

    /// External ids of every stored customer of the account
    async fn list_external_ids(&self, account: Account) -> Result<Vec<String>>;

    async fn count(&self, account: Account) -> Result<u64>;

    async fn get(&self, account: Account, external_id: &str) -> Result<Option<Customer>>;

    async fn list(&self, account: Account) -> Result<Vec<Customer>>;

    /// Replace the local annotations of a customer and return the updated row
    async fn annotate(
        &self,
        account: Account,
        external_id: &str,
        annotations: &CustomerAnnotations,
    ) -> Result<Customer>;

    /// Delete customers and their charges in one transaction
    async fn delete_with_charges(
        &self,
        account: Account,
        external_ids: &[String],
    ) -> Result<RemovalCounts>;
}

/// Trait for storing mirrored charges
#[async_trait]
pub trait ChargeRepository: Send + Sync {
    /// Create or update a charge attached to the given local customer row
    async fn upsert(&self, customer_local_id: i64, charge: &ChargeUpsert) -> Result<UpsertOutcome>;

    /// Identifiers of every stored charge of the account
    async fn list_keys(&self, account: Account) -> Result<Vec<ChargeKey>>;

    /// Delete charges in one transaction, returning how many were removed
    async fn delete(&self, account: Account, external_ids: &[String]) -> Result<u64>;

    async fn count(&self, account: Account) -> Result<u64>;

    async fn list_for_customer(
        &self,
        account: Account,
        customer_external_id: &str,
    ) -> Result<Vec<Charge>>;
}

/// Append-only audit log of sync runs
#[async_trait]
pub trait SyncRunLog: Send + Sync {
    /// Insert an IN_PROGRESS row
    async fn start_run(&self, run: &NewSyncRun) -> Result<RunId>;

    /// Write the end-of-run fields. Rows no longer IN_PROGRESS are left as
    /// they are.
    async fn finish_run(&self, id: &RunId, completion: &RunCompletion) -> Result<()>;

    async fn get_run(&self, id: &RunId) -> Result<Option<SyncRun>>;

    /// Most recent runs first
    async fn list_recent(&self, limit: u32) -> Result<Vec<SyncRun>>;

    /// The IN_PROGRESS run of an account, if any
    async fn find_in_progress(&self, account: Account) -> Result<Option<SyncRun>>;

    /// Close every IN_PROGRESS row as ERROR with `reason`, returning how many
    /// were closed
    async fn close_abandoned(&self, reason: &str) -> Result<u64>;
}
