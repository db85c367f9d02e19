//! Scriptable in-memory remote platform.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use billsync_core::RemoteSource;
use billsync_domain::{
    BillSyncError, Page, PageRequest, RejectedRecord, RemoteCharge, RemoteCustomer,
    Result as DomainResult,
};

/// In-memory `RemoteSource`.
///
/// Serves offset/limit slices of its datasets and can be told to misreport
/// totals or to fail specific requests.
#[derive(Default)]
pub struct FakeRemote {
    customers: Mutex<Vec<RemoteCustomer>>,
    charges: Mutex<HashMap<String, Vec<RemoteCharge>>>,
    rejected_customers: Mutex<Vec<RejectedRecord>>,
    customer_total_override: Mutex<Option<u64>>,
    charge_total_overrides: Mutex<HashMap<String, u64>>,
    customer_failure: Mutex<Option<(u64, BillSyncError)>>,
    charge_failures: Mutex<HashMap<String, BillSyncError>>,
    customer_calls: AtomicUsize,
    charge_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new(customers: Vec<RemoteCustomer>) -> Self {
        let remote = Self::default();
        *remote.customers.lock().unwrap() = customers;
        remote
    }

    pub fn with_charges(self, customer: &str, charges: Vec<RemoteCharge>) -> Self {
        self.charges.lock().unwrap().insert(customer.to_string(), charges);
        self
    }

    pub fn set_customers(&self, customers: Vec<RemoteCustomer>) {
        *self.customers.lock().unwrap() = customers;
    }

    pub fn set_charges(&self, customer: &str, charges: Vec<RemoteCharge>) {
        self.charges.lock().unwrap().insert(customer.to_string(), charges);
    }

    /// Serve an undecodable customer entry alongside the real ones.
    pub fn reject_customer(&self, external_id: Option<&str>, reason: &str) {
        self.rejected_customers.lock().unwrap().push(RejectedRecord {
            external_id: external_id.map(str::to_string),
            reason: reason.to_string(),
        });
    }

    /// Report a customer `totalCount` different from what is served.
    pub fn misreport_customer_total(&self, total: u64) {
        *self.customer_total_override.lock().unwrap() = Some(total);
    }

    /// Report a charge `totalCount` for one customer different from what is
    /// served.
    pub fn misreport_charge_total(&self, customer: &str, total: u64) {
        self.charge_total_overrides.lock().unwrap().insert(customer.to_string(), total);
    }

    /// Fail customer pages starting at `offset`.
    pub fn fail_customers_from(&self, offset: u64, error: BillSyncError) {
        *self.customer_failure.lock().unwrap() = Some((offset, error));
    }

    /// Fail every charge page of one customer (or of the unfiltered listing
    /// when `customer` is empty).
    pub fn fail_charges_for(&self, customer: &str, error: BillSyncError) {
        self.charge_failures.lock().unwrap().insert(customer.to_string(), error);
    }

    pub fn customer_calls(&self) -> usize {
        self.customer_calls.load(Ordering::SeqCst)
    }

    pub fn charge_calls(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }
}

fn slice<T: Clone>(items: &[T], page: PageRequest) -> (Vec<T>, bool) {
    let start = usize::try_from(page.offset).unwrap().min(items.len());
    let end = (start + page.limit as usize).min(items.len());
    (items[start..end].to_vec(), end < items.len())
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn list_customers(&self, page: PageRequest) -> DomainResult<Page<RemoteCustomer>> {
        self.customer_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((offset, error)) = self.customer_failure.lock().unwrap().clone() {
            if page.offset >= offset {
                return Err(error);
            }
        }

        let customers = self.customers.lock().unwrap().clone();
        let rejected = self.rejected_customers.lock().unwrap().clone();
        let served = customers.len() + rejected.len();
        let (records, has_more) = slice(&customers, page);
        // Rejected entries ride along on the first page.
        let rejected = if page.offset == 0 { rejected } else { Vec::new() };
        let total = self.customer_total_override.lock().unwrap().unwrap_or(served as u64);

        Ok(Page { records, rejected, has_more, total_count: total })
    }

    async fn list_charges(
        &self,
        customer: Option<&str>,
        page: PageRequest,
    ) -> DomainResult<Page<RemoteCharge>> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        let key = customer.unwrap_or_default();
        if let Some(error) = self.charge_failures.lock().unwrap().get(key).cloned() {
            return Err(error);
        }

        let charges: Vec<RemoteCharge> = match customer {
            Some(customer) => {
                self.charges.lock().unwrap().get(customer).cloned().unwrap_or_default()
            }
            None => self.charges.lock().unwrap().values().flatten().cloned().collect(),
        };
        let (records, has_more) = slice(&charges, page);
        let total = self
            .charge_total_overrides
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(charges.len() as u64);

        Ok(Page { records, rejected: Vec::new(), has_more, total_count: total })
    }
}
