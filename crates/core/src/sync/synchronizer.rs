//! Create-or-update of single remote records

use std::sync::Arc;

use billsync_domain::{
    Account, ChargeUpsert, CustomerUpsert, EntityCounts, RemoteCharge, RemoteCustomer, Result,
};
use tracing::debug;

use super::ports::{ChargeRepository, CustomerRepository, UpsertOutcome};

/// Result of synchronizing one remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    /// A charge whose customer is not stored locally; nothing was written.
    Orphan,
}

impl SyncOutcome {
    /// Add this outcome to the per-entity tallies.
    pub fn tally(self, counts: &mut EntityCounts) {
        match self {
            Self::Created => counts.created += 1,
            Self::Updated => counts.updated += 1,
            Self::Unchanged => counts.unchanged += 1,
            Self::Orphan => counts.orphaned += 1,
        }
    }
}

impl From<UpsertOutcome> for SyncOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created => Self::Created,
            UpsertOutcome::Updated => Self::Updated,
            UpsertOutcome::Unchanged => Self::Unchanged,
        }
    }
}

/// Maps remote records onto local rows, one record per transaction.
#[derive(Clone)]
pub struct UpsertSynchronizer {
    customers: Arc<dyn CustomerRepository>,
    charges: Arc<dyn ChargeRepository>,
}

impl UpsertSynchronizer {
    pub fn new(customers: Arc<dyn CustomerRepository>, charges: Arc<dyn ChargeRepository>) -> Self {
        Self { customers, charges }
    }

    /// Create or update one customer.
    ///
    /// # Errors
    /// Propagates the repository error for this record only.
    pub async fn sync_customer(
        &self,
        account: Account,
        remote: &RemoteCustomer,
    ) -> Result<SyncOutcome> {
        let upsert = CustomerUpsert::from_remote(account, remote);
        let outcome = self.customers.upsert(&upsert).await?;
        Ok(outcome.into())
    }

    /// Create or update one charge under its local customer.
    ///
    /// Returns [`SyncOutcome::Orphan`] when the customer is not stored.
    ///
    /// # Errors
    /// Propagates the repository error for this record only.
    pub async fn sync_charge(&self, account: Account, remote: &RemoteCharge) -> Result<SyncOutcome> {
        let upsert = ChargeUpsert::from_remote(account, remote);
        let Some(customer_id) =
            self.customers.find_local_id(account, &upsert.customer_external_id).await?
        else {
            debug!(
                charge = %upsert.external_id,
                customer = %upsert.customer_external_id,
                "skipping orphan charge"
            );
            return Ok(SyncOutcome::Orphan);
        };

        let outcome = self.charges.upsert(customer_id, &upsert).await?;
        Ok(outcome.into())
    }
}
