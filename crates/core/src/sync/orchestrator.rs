//! Sync run state machine
//!
//! `INIT → DOWNLOAD_CUSTOMERS → DOWNLOAD_CHARGES → PERSIST_CUSTOMERS →
//! PERSIST_CHARGES → RECONCILE → DONE`, with `FAILED` reachable from every
//! phase. Per-record failures are tallied and the run carries on; a
//! phase-level error stops the run and whatever was counted so far is still
//! written to the run log.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use billsync_domain::{
    Account, BillSyncError, Config, EntityCounts, NewSyncRun, PageRequest, RemoteCharge,
    RemoteCustomer, RemoteRecord, Result, RunCompletion, RunId, RunKind, RunStatus, SyncPhase,
    SyncRequest, SyncRun, ValidationReport,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::fetcher::{FetchSettings, Listing, PaginatedFetcher};
use super::ports::{ChargeRepository, CustomerRepository, RemoteSource, SyncRunLog};
use super::reconciler::{ReconcileOutcome, Reconciler, RemoteIdSet};
use super::synchronizer::UpsertSynchronizer;

/// Engine settings taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub fetch: FetchSettings,
    /// Customers whose charges are downloaded at the same time.
    pub charge_concurrency: usize,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            fetch: FetchSettings {
                page_size: config.remote.effective_page_size(),
                customer_page_delay: Duration::from_millis(config.sync.customer_page_delay_ms),
                charge_page_delay: Duration::from_millis(config.sync.charge_page_delay_ms),
            },
            charge_concurrency: config.sync.charge_concurrency.max(1),
        }
    }
}

/// A run whose log row has been written but which has not executed yet.
#[derive(Debug, Clone)]
pub struct RunHandle {
    id: RunId,
    request: SyncRequest,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunHandle {
    pub const fn id(&self) -> RunId {
        self.id
    }

    pub const fn request(&self) -> &SyncRequest {
        &self.request
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Counts and notes accumulated while a run moves through its phases.
struct RunState {
    run_id: RunId,
    account: Account,
    phase: SyncPhase,
    customers: EntityCounts,
    charges: EntityCounts,
    notes: Vec<String>,
    reconcile_skipped: Option<String>,
}

impl RunState {
    fn new(handle: &RunHandle) -> Self {
        Self {
            run_id: handle.id,
            account: handle.request.account,
            phase: SyncPhase::Init,
            customers: EntityCounts::default(),
            charges: EntityCounts::default(),
            notes: Vec::new(),
            reconcile_skipped: None,
        }
    }

    fn enter(&mut self, phase: SyncPhase, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BillSyncError::Cancelled(format!("run cancelled before {phase}")));
        }
        self.phase = phase;
        info!(run_id = %self.run_id, account = %self.account, %phase, "entering phase");
        Ok(())
    }

    fn finish(&mut self) {
        self.phase = SyncPhase::Done;
        info!(run_id = %self.run_id, account = %self.account, "all phases finished");
    }

    fn has_errors(&self) -> bool {
        self.customers.errors > 0 || self.charges.errors > 0
    }

    fn completion(self, handle: &RunHandle, failure: Option<BillSyncError>) -> RunCompletion {
        let status = if failure.is_some() {
            RunStatus::Error
        } else if self.has_errors() || self.reconcile_skipped.is_some() {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        let mut summary = format!(
            "customers: {} seen, {} created, {} updated, {} unchanged, {} removed, {} errors; \
             charges: {} seen, {} created, {} updated, {} unchanged, {} orphaned, {} removed, {} errors",
            self.customers.seen,
            self.customers.created,
            self.customers.updated,
            self.customers.unchanged,
            self.customers.removed,
            self.customers.errors,
            self.charges.seen,
            self.charges.created,
            self.charges.updated,
            self.charges.unchanged,
            self.charges.orphaned,
            self.charges.removed,
            self.charges.errors,
        );
        for note in &self.notes {
            summary.push_str("; ");
            summary.push_str(note);
        }
        if let Some(reason) = &self.reconcile_skipped {
            summary.push_str("; reconcile skipped: ");
            summary.push_str(reason);
        }

        RunCompletion {
            status,
            phase: if failure.is_some() { SyncPhase::Failed } else { SyncPhase::Done },
            finished_at: Utc::now(),
            duration_ms: u64::try_from(handle.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            customers: self.customers,
            charges: self.charges,
            summary,
            error_detail: failure.map(|err| format!("{}: {err}", self.phase)),
        }
    }
}

/// Add a listing's download statistics to the entity counts.
fn tally_listing<T>(counts: &mut EntityCounts, listing: &Listing<T>) {
    counts.seen += listing.unique_count();
    counts.errors += listing.rejected.len() as u64;
    if listing.failure.is_some() {
        counts.errors += 1;
    }
}

/// Drives sync runs against one local store.
pub struct SyncOrchestrator {
    customers: Arc<dyn CustomerRepository>,
    charges: Arc<dyn ChargeRepository>,
    run_log: Arc<dyn SyncRunLog>,
    synchronizer: UpsertSynchronizer,
    reconciler: Reconciler,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        charges: Arc<dyn ChargeRepository>,
        run_log: Arc<dyn SyncRunLog>,
        settings: SyncSettings,
    ) -> Self {
        let synchronizer = UpsertSynchronizer::new(Arc::clone(&customers), Arc::clone(&charges));
        let reconciler = Reconciler::new(Arc::clone(&customers), Arc::clone(&charges));
        Self { customers, charges, run_log, synchronizer, reconciler, settings }
    }

    pub fn run_log(&self) -> &Arc<dyn SyncRunLog> {
        &self.run_log
    }

    pub fn customers(&self) -> &Arc<dyn CustomerRepository> {
        &self.customers
    }

    pub fn charges(&self) -> &Arc<dyn ChargeRepository> {
        &self.charges
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Open, execute and close a run.
    ///
    /// # Errors
    /// Only run-log failures are returned; everything that happens inside
    /// the run ends up in the returned row's status.
    pub async fn run(
        &self,
        request: SyncRequest,
        source: Arc<dyn RemoteSource>,
        cancel: CancellationToken,
    ) -> Result<SyncRun> {
        let handle = self.open_run(request).await?;
        self.drive(handle, source, cancel).await
    }

    /// Write the IN_PROGRESS row for a new run.
    ///
    /// # Errors
    /// Returns the run log error.
    pub async fn open_run(&self, mut request: SyncRequest) -> Result<RunHandle> {
        if request.kind == RunKind::MissingCharges && request.reconcile {
            warn!(account = %request.account, "missing-charges runs never reconcile, ignoring flag");
            request.reconcile = false;
        }

        let started_at = Utc::now();
        let new_run = NewSyncRun {
            id: RunId::new(),
            kind: request.kind,
            account: request.account,
            triggered_by: request.triggered_by.clone(),
            reconcile_requested: request.reconcile,
            started_at,
        };
        let id = self.run_log.start_run(&new_run).await?;
        info!(
            run_id = %id,
            account = %request.account,
            kind = request.kind.as_str(),
            reconcile = request.reconcile,
            triggered_by = %request.triggered_by,
            "sync run started"
        );

        Ok(RunHandle { id, request, started_at, started: Instant::now() })
    }

    /// Execute an opened run and write its completion.
    ///
    /// # Errors
    /// Returns run-log errors only.
    pub async fn drive(
        &self,
        handle: RunHandle,
        source: Arc<dyn RemoteSource>,
        cancel: CancellationToken,
    ) -> Result<SyncRun> {
        let mut state = RunState::new(&handle);
        let fetcher = PaginatedFetcher::new(source, self.settings.fetch, cancel.clone());

        let outcome = match handle.request.kind {
            RunKind::Full => self.execute_full(&handle, &fetcher, &cancel, &mut state).await,
            RunKind::MissingCharges => {
                self.execute_missing_charges(&fetcher, &cancel, &mut state).await
            }
        };

        let failure = match outcome {
            Ok(()) => None,
            Err(err) => {
                error!(
                    run_id = %handle.id,
                    phase = %state.phase,
                    error = %err,
                    error_type = err.label(),
                    "sync run failed"
                );
                Some(err)
            }
        };

        let completion = state.completion(&handle, failure);
        info!(
            run_id = %handle.id,
            status = completion.status.as_str(),
            duration_ms = completion.duration_ms,
            summary = %completion.summary,
            "sync run finished"
        );
        self.run_log.finish_run(&handle.id, &completion).await?;

        self.run_log
            .get_run(&handle.id)
            .await?
            .ok_or_else(|| BillSyncError::Internal(format!("run {} vanished from the log", handle.id)))
    }

    async fn execute_full(
        &self,
        handle: &RunHandle,
        fetcher: &PaginatedFetcher,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        state.enter(SyncPhase::DownloadCustomers, cancel)?;
        let customers = fetcher.fetch_customers().await?;
        tally_listing(&mut state.customers, &customers);
        if let Some(reason) = customers.incompleteness() {
            state.notes.push(format!("customer listing incomplete: {reason}"));
        }

        state.enter(SyncPhase::DownloadCharges, cancel)?;
        let customer_ids = customers.records.iter().map(|c| c.external_id().to_owned()).collect();
        let charge_listings = self.download_charges(fetcher, customer_ids, state).await?;

        state.enter(SyncPhase::PersistCustomers, cancel)?;
        self.persist_customers(&customers.records, cancel, state).await?;

        state.enter(SyncPhase::PersistCharges, cancel)?;
        self.persist_charges(&charge_listings, cancel, state).await?;

        if handle.request.reconcile {
            state.enter(SyncPhase::Reconcile, cancel)?;
            self.reconcile(&customers, &charge_listings, state).await?;
        }

        state.finish();
        Ok(())
    }

    async fn execute_missing_charges(
        &self,
        fetcher: &PaginatedFetcher,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        state.enter(SyncPhase::DownloadCharges, cancel)?;
        let customer_ids = self.customers.list_external_ids(state.account).await?;
        let charge_listings = self.download_charges(fetcher, customer_ids, state).await?;

        state.enter(SyncPhase::PersistCharges, cancel)?;
        self.persist_charges(&charge_listings, cancel, state).await?;

        state.finish();
        Ok(())
    }

    async fn download_charges(
        &self,
        fetcher: &PaginatedFetcher,
        customer_ids: Vec<String>,
        state: &mut RunState,
    ) -> Result<Vec<(String, Listing<RemoteCharge>)>> {
        let total = customer_ids.len();
        let mut downloads = stream::iter(customer_ids)
            .map(move |customer| async move {
                let listing = fetcher.fetch_charges(&customer).await;
                (customer, listing)
            })
            .buffer_unordered(self.settings.charge_concurrency.max(1));

        let mut listings = Vec::with_capacity(total);
        let mut incomplete = 0_usize;
        while let Some((customer, listing)) = downloads.next().await {
            let listing = listing?;
            tally_listing(&mut state.charges, &listing);
            if let Some(reason) = listing.incompleteness() {
                warn!(run_id = %state.run_id, customer = %customer, reason = %reason, "charge listing incomplete");
                incomplete += 1;
            }
            listings.push((customer, listing));
        }

        if incomplete > 0 {
            state.notes.push(format!("{incomplete} of {total} charge listings incomplete"));
        }
        Ok(listings)
    }

    async fn persist_customers(
        &self,
        records: &[RemoteCustomer],
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        for remote in records {
            if cancel.is_cancelled() {
                return Err(BillSyncError::Cancelled("run cancelled while persisting customers".into()));
            }
            match self.synchronizer.sync_customer(state.account, remote).await {
                Ok(outcome) => outcome.tally(&mut state.customers),
                Err(err) if err.aborts_phase() => return Err(err),
                Err(err) => {
                    state.customers.errors += 1;
                    warn!(run_id = %state.run_id, customer = %remote.id, error = %err, "failed to persist customer");
                }
            }
        }
        Ok(())
    }

    async fn persist_charges(
        &self,
        listings: &[(String, Listing<RemoteCharge>)],
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        for remote in listings.iter().flat_map(|(_, listing)| &listing.records) {
            if cancel.is_cancelled() {
                return Err(BillSyncError::Cancelled("run cancelled while persisting charges".into()));
            }
            match self.synchronizer.sync_charge(state.account, remote).await {
                Ok(outcome) => outcome.tally(&mut state.charges),
                Err(err) if err.aborts_phase() => return Err(err),
                Err(err) => {
                    state.charges.errors += 1;
                    warn!(run_id = %state.run_id, charge = %remote.id, error = %err, "failed to persist charge");
                }
            }
        }
        Ok(())
    }

    /// Reconcile behind the completeness gate.
    async fn reconcile(
        &self,
        customer_listing: &Listing<RemoteCustomer>,
        charge_listings: &[(String, Listing<RemoteCharge>)],
        state: &mut RunState,
    ) -> Result<()> {
        let gate = customer_listing
            .incompleteness()
            .map(|reason| format!("customer listing incomplete ({reason})"))
            .or_else(|| {
                charge_listings.iter().find_map(|(customer, listing)| {
                    listing
                        .incompleteness()
                        .map(|reason| format!("charge listing for {customer} incomplete ({reason})"))
                })
            });
        if let Some(reason) = gate {
            warn!(run_id = %state.run_id, reason = %reason, "reconciliation skipped");
            state.reconcile_skipped = Some(reason);
            return Ok(());
        }

        match self.reconciler.reconcile_customers(state.account, &customer_listing.remote_ids()).await? {
            ReconcileOutcome::Removed { customers, charges } => {
                state.customers.removed += customers;
                state.charges.removed += charges;
            }
            ReconcileOutcome::Skipped { reason } => {
                state.reconcile_skipped = Some(reason);
                return Ok(());
            }
        }

        let listed: HashSet<String> =
            charge_listings.iter().map(|(customer, _)| customer.clone()).collect();
        let charge_ids: HashSet<String> =
            charge_listings.iter().flat_map(|(_, listing)| listing.ids_seen.iter().cloned()).collect();
        match self
            .reconciler
            .reconcile_charges(state.account, &RemoteIdSet::new(charge_ids, true), &listed)
            .await?
        {
            ReconcileOutcome::Removed { charges, .. } => state.charges.removed += charges,
            ReconcileOutcome::Skipped { reason } => state.reconcile_skipped = Some(reason),
        }
        Ok(())
    }

    /// Compare local counts with the totals the remote reports. Read-only.
    ///
    /// # Errors
    /// Returns the remote or repository error.
    pub async fn validate(
        &self,
        source: &dyn RemoteSource,
        account: Account,
    ) -> Result<ValidationReport> {
        let probe = PageRequest::first(1);
        let remote_customers = source.list_customers(probe).await?.total_count;
        let remote_charges = source.list_charges(None, probe).await?.total_count;
        let local_customers = self.customers.count(account).await?;
        let local_charges = self.charges.count(account).await?;

        let report = ValidationReport {
            account,
            local_customers,
            remote_customers,
            local_charges,
            remote_charges,
            checked_at: Utc::now(),
        };
        if !report.is_consistent() {
            warn!(
                %account,
                local_customers,
                remote_customers,
                local_charges,
                remote_charges,
                "local store diverges from remote totals"
            );
        }
        Ok(report)
    }
}
