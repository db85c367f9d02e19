//! Removal of local records that no longer exist remotely
//!
//! Destructive, so every entry point first checks that the remote id set
//! came from a complete listing and refuses otherwise.

use std::collections::HashSet;
use std::sync::Arc;

use billsync_domain::{Account, Result};
use tracing::{info, instrument, warn};

use super::ports::{ChargeRepository, CustomerRepository};

/// Remote ids observed by one listing, tagged with its completeness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIdSet {
    ids: HashSet<String>,
    complete: bool,
}

impl RemoteIdSet {
    pub fn new(ids: HashSet<String>, complete: bool) -> Self {
        Self { ids, complete }
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.ids.contains(external_id)
    }

    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// What a reconciliation step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Removed { customers: u64, charges: u64 },
    Skipped { reason: String },
}

/// Deletes local customers and charges absent from complete remote listings.
#[derive(Clone)]
pub struct Reconciler {
    customers: Arc<dyn CustomerRepository>,
    charges: Arc<dyn ChargeRepository>,
}

impl Reconciler {
    pub fn new(customers: Arc<dyn CustomerRepository>, charges: Arc<dyn ChargeRepository>) -> Self {
        Self { customers, charges }
    }

    /// Remove local customers of `account` missing from `remote`, together
    /// with their charges.
    ///
    /// # Errors
    /// Returns the repository error; the delete transaction is rolled back.
    #[instrument(skip(self, remote), fields(remote_ids = remote.len()))]
    pub async fn reconcile_customers(
        &self,
        account: Account,
        remote: &RemoteIdSet,
    ) -> Result<ReconcileOutcome> {
        if !remote.is_complete() {
            warn!("customer listing incomplete, refusing to reconcile");
            return Ok(ReconcileOutcome::Skipped {
                reason: "customer listing incomplete".to_string(),
            });
        }

        let stale: Vec<String> = self
            .customers
            .list_external_ids(account)
            .await?
            .into_iter()
            .filter(|id| !remote.contains(id))
            .collect();

        if stale.is_empty() {
            return Ok(ReconcileOutcome::Removed { customers: 0, charges: 0 });
        }

        let removed = self.customers.delete_with_charges(account, &stale).await?;
        info!(
            customers = removed.customers,
            charges = removed.charges,
            "removed customers missing remotely"
        );
        Ok(ReconcileOutcome::Removed { customers: removed.customers, charges: removed.charges })
    }

    /// Remove local charges of the listed customers that are missing from
    /// the union of their charge listings.
    ///
    /// Charges of customers outside `listed_customers` are never touched.
    ///
    /// # Errors
    /// Returns the repository error; the delete transaction is rolled back.
    #[instrument(skip(self, remote, listed_customers), fields(remote_ids = remote.len()))]
    pub async fn reconcile_charges(
        &self,
        account: Account,
        remote: &RemoteIdSet,
        listed_customers: &HashSet<String>,
    ) -> Result<ReconcileOutcome> {
        if !remote.is_complete() {
            warn!("charge listings incomplete, refusing to reconcile");
            return Ok(ReconcileOutcome::Skipped {
                reason: "charge listings incomplete".to_string(),
            });
        }

        let stale: Vec<String> = self
            .charges
            .list_keys(account)
            .await?
            .into_iter()
            .filter(|key| {
                listed_customers.contains(&key.customer_external_id)
                    && !remote.contains(&key.external_id)
            })
            .map(|key| key.external_id)
            .collect();

        if stale.is_empty() {
            return Ok(ReconcileOutcome::Removed { customers: 0, charges: 0 });
        }

        let charges = self.charges.delete(account, &stale).await?;
        info!(charges, "removed charges missing remotely");
        Ok(ReconcileOutcome::Removed { customers: 0, charges })
    }
}
