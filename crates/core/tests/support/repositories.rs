//! In-memory repository and run log implementations.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use billsync_core::{ChargeRepository, CustomerRepository, RemovalCounts, SyncRunLog, UpsertOutcome};
use billsync_domain::{
    Account, BillSyncError, Charge, ChargeKey, ChargeUpsert, Customer, CustomerAnnotations,
    CustomerUpsert, NewSyncRun, Result as DomainResult, RunCompletion, RunId, RunStatus,
    SyncPhase, SyncRun,
};
use chrono::Utc;

#[derive(Default)]
struct StoreState {
    next_id: i64,
    customers: BTreeMap<(Account, String), Customer>,
    charges: BTreeMap<(Account, String), Charge>,
}

impl StoreState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Customers and charges kept in ordered maps.
///
/// Implements both repository ports so the referential rules (charges need
/// a stored customer, customer removal takes its charges) hold across them.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    failing_customer_writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Make upserts of this customer fail with a database error.
    pub fn fail_writes_for(&self, external_id: &str) {
        self.failing_customer_writes.lock().unwrap().push(external_id.to_string());
    }

    pub fn customer_ids(&self, account: Account) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .customers
            .keys()
            .filter(|(acc, _)| *acc == account)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn charge_ids(&self, account: Account) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .charges
            .keys()
            .filter(|(acc, _)| *acc == account)
            .map(|(_, id)| id.clone())
            .collect()
    }
}

#[async_trait]
impl CustomerRepository for MemoryStore {
    async fn find_local_id(&self, account: Account, external_id: &str) -> DomainResult<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state.customers.get(&(account, external_id.to_string())).map(|c| c.id))
    }

    async fn upsert(&self, customer: &CustomerUpsert) -> DomainResult<UpsertOutcome> {
        if self.failing_customer_writes.lock().unwrap().contains(&customer.external_id) {
            return Err(BillSyncError::Database("disk I/O error".into()));
        }

        let mut state = self.state.lock().unwrap();
        let key = (customer.account, customer.external_id.clone());
        let now = Utc::now();
        if let Some(existing) = state.customers.get_mut(&key) {
            existing.synced_at = now;
            if existing.fields == *customer {
                return Ok(UpsertOutcome::Unchanged);
            }
            existing.fields = customer.clone();
            return Ok(UpsertOutcome::Updated);
        }

        let id = state.allocate_id();
        state.customers.insert(
            key,
            Customer {
                id,
                fields: customer.clone(),
                annotations: CustomerAnnotations::default(),
                synced_at: now,
                created_at: now,
            },
        );
        Ok(UpsertOutcome::Created)
    }

    async fn list_external_ids(&self, account: Account) -> DomainResult<Vec<String>> {
        Ok(self.customer_ids(account))
    }

    async fn count(&self, account: Account) -> DomainResult<u64> {
        Ok(self.customer_ids(account).len() as u64)
    }

    async fn get(&self, account: Account, external_id: &str) -> DomainResult<Option<Customer>> {
        Ok(self.state.lock().unwrap().customers.get(&(account, external_id.to_string())).cloned())
    }

    async fn list(&self, account: Account) -> DomainResult<Vec<Customer>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .customers
            .values()
            .filter(|c| c.fields.account == account)
            .cloned()
            .collect())
    }

    async fn annotate(
        &self,
        account: Account,
        external_id: &str,
        annotations: &CustomerAnnotations,
    ) -> DomainResult<Customer> {
        let mut state = self.state.lock().unwrap();
        let customer = state
            .customers
            .get_mut(&(account, external_id.to_string()))
            .ok_or_else(|| BillSyncError::NotFound(external_id.to_string()))?;
        customer.annotations = annotations.clone();
        Ok(customer.clone())
    }

    async fn delete_with_charges(
        &self,
        account: Account,
        external_ids: &[String],
    ) -> DomainResult<RemovalCounts> {
        let mut state = self.state.lock().unwrap();
        let before = state.charges.len();
        state.charges.retain(|(acc, _), charge| {
            *acc != account || !external_ids.contains(&charge.fields.customer_external_id)
        });
        let charges = (before - state.charges.len()) as u64;

        let before = state.customers.len();
        state.customers.retain(|(acc, id), _| *acc != account || !external_ids.contains(id));
        let customers = (before - state.customers.len()) as u64;

        Ok(RemovalCounts { customers, charges })
    }
}

#[async_trait]
impl ChargeRepository for MemoryStore {
    async fn upsert(&self, customer_local_id: i64, charge: &ChargeUpsert) -> DomainResult<UpsertOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.customers.values().any(|c| c.id == customer_local_id) {
            return Err(BillSyncError::Database("FOREIGN KEY constraint failed".into()));
        }

        let key = (charge.account, charge.external_id.clone());
        let now = Utc::now();
        if let Some(existing) = state.charges.get_mut(&key) {
            existing.synced_at = now;
            if existing.fields == *charge && existing.customer_id == customer_local_id {
                return Ok(UpsertOutcome::Unchanged);
            }
            existing.fields = charge.clone();
            existing.customer_id = customer_local_id;
            return Ok(UpsertOutcome::Updated);
        }

        let id = state.allocate_id();
        state.charges.insert(
            key,
            Charge {
                id,
                customer_id: customer_local_id,
                fields: charge.clone(),
                synced_at: now,
                created_at: now,
            },
        );
        Ok(UpsertOutcome::Created)
    }

    async fn list_keys(&self, account: Account) -> DomainResult<Vec<ChargeKey>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .charges
            .values()
            .filter(|c| c.fields.account == account)
            .map(|c| ChargeKey {
                external_id: c.fields.external_id.clone(),
                customer_external_id: c.fields.customer_external_id.clone(),
            })
            .collect())
    }

    async fn delete(&self, account: Account, external_ids: &[String]) -> DomainResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.charges.len();
        state.charges.retain(|(acc, id), _| *acc != account || !external_ids.contains(id));
        Ok((before - state.charges.len()) as u64)
    }

    async fn count(&self, account: Account) -> DomainResult<u64> {
        Ok(self.charge_ids(account).len() as u64)
    }

    async fn list_for_customer(
        &self,
        account: Account,
        customer_external_id: &str,
    ) -> DomainResult<Vec<Charge>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .charges
            .values()
            .filter(|c| {
                c.fields.account == account && c.fields.customer_external_id == customer_external_id
            })
            .cloned()
            .collect())
    }
}

/// Run log kept in a vector, newest last.
#[derive(Default)]
pub struct MemoryRunLog {
    runs: Mutex<Vec<SyncRun>>,
}

impl MemoryRunLog {
    pub fn all(&self) -> Vec<SyncRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncRunLog for MemoryRunLog {
    async fn start_run(&self, run: &NewSyncRun) -> DomainResult<RunId> {
        self.runs.lock().unwrap().push(SyncRun {
            id: run.id,
            kind: run.kind,
            account: run.account,
            status: RunStatus::InProgress,
            phase: SyncPhase::Init,
            triggered_by: run.triggered_by.clone(),
            reconcile_requested: run.reconcile_requested,
            started_at: run.started_at,
            finished_at: None,
            duration_ms: None,
            customers: Default::default(),
            charges: Default::default(),
            summary: None,
            error_detail: None,
        });
        Ok(run.id)
    }

    async fn finish_run(&self, id: &RunId, completion: &RunCompletion) -> DomainResult<()> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) =
            runs.iter_mut().find(|run| run.id == *id && run.status == RunStatus::InProgress)
        {
            run.status = completion.status;
            run.phase = completion.phase;
            run.finished_at = Some(completion.finished_at);
            run.duration_ms = Some(completion.duration_ms);
            run.customers = completion.customers;
            run.charges = completion.charges;
            run.summary = Some(completion.summary.clone());
            run.error_detail = completion.error_detail.clone();
        }
        Ok(())
    }

    async fn get_run(&self, id: &RunId) -> DomainResult<Option<SyncRun>> {
        Ok(self.runs.lock().unwrap().iter().find(|run| run.id == *id).cloned())
    }

    async fn list_recent(&self, limit: u32) -> DomainResult<Vec<SyncRun>> {
        Ok(self.runs.lock().unwrap().iter().rev().take(limit as usize).cloned().collect())
    }

    async fn find_in_progress(&self, account: Account) -> DomainResult<Option<SyncRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .find(|run| run.account == account && run.status == RunStatus::InProgress)
            .cloned())
    }

    async fn close_abandoned(&self, reason: &str) -> DomainResult<u64> {
        let mut runs = self.runs.lock().unwrap();
        let mut closed = 0;
        for run in runs.iter_mut().filter(|run| run.status == RunStatus::InProgress) {
            run.status = RunStatus::Error;
            run.phase = SyncPhase::Failed;
            run.error_detail = Some(reason.to_string());
            closed += 1;
        }
        Ok(closed)
    }
}
