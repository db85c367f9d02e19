//! Local-only customer annotations

use billsync_domain::{Account, BillSyncError, Customer, CustomerAnnotations, Result};
use tracing::info;

use super::ports::CustomerRepository;

/// Fields to change; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationChange {
    /// `Some(None)` clears the handler.
    pub assigned_handler: Option<Option<String>>,
    pub service_completed: Option<bool>,
}

impl AnnotationChange {
    pub const fn is_empty(&self) -> bool {
        self.assigned_handler.is_none() && self.service_completed.is_none()
    }

    fn apply(self, current: &CustomerAnnotations) -> CustomerAnnotations {
        CustomerAnnotations {
            assigned_handler: match self.assigned_handler {
                Some(handler) => handler.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()),
                None => current.assigned_handler.clone(),
            },
            service_completed: self.service_completed.unwrap_or(current.service_completed),
        }
    }
}

/// Update the annotations of a stored customer.
///
/// # Errors
/// `NotFound` when the customer is not stored locally, `InvalidInput` when
/// the change is empty, otherwise the repository error.
pub async fn annotate_customer(
    repository: &dyn CustomerRepository,
    account: Account,
    external_id: &str,
    change: AnnotationChange,
) -> Result<Customer> {
    if change.is_empty() {
        return Err(BillSyncError::InvalidInput("nothing to annotate".into()));
    }

    let current = repository.get(account, external_id).await?.ok_or_else(|| {
        BillSyncError::NotFound(format!("customer {external_id} in account {account}"))
    })?;

    let annotations = change.apply(&current.annotations);
    let updated = repository.annotate(account, external_id, &annotations).await?;
    info!(%account, customer = external_id, "customer annotations updated");
    Ok(updated)
}
