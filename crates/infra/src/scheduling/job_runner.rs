//! Bounded executor for sync runs.
//!
//! Every run, whether submitted in the background (HTTP, scheduler) or
//! driven in the foreground (CLI), passes through [`SyncJobRunner`]. The
//! runner refuses a second run for an account that already has one in
//! progress, caps how many runs execute at once, and keeps the join handles
//! of background runs so shutdown can cancel and await them.

use std::sync::Arc;
use std::time::Duration;

use billsync_core::{RemoteSource, RunHandle, SyncOrchestrator};
use billsync_domain::{Account, Config, Result, RunId, SyncRequest, SyncRun, ValidationReport};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::JobError;
use crate::integrations::AsaasClient;

/// Builds the remote source used by one run.
pub type SourceFactory = Arc<dyn Fn(Account) -> Result<Arc<dyn RemoteSource>> + Send + Sync>;

pub struct SyncJobRunner {
    orchestrator: Arc<SyncOrchestrator>,
    source_factory: SourceFactory,
    permits: Arc<Semaphore>,
    /// Serialises the in-progress check with writing the new run row.
    start_guard: Mutex<()>,
    tasks: Mutex<JoinSet<()>>,
    cancellation: CancellationToken,
}

impl SyncJobRunner {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        source_factory: SourceFactory,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            orchestrator,
            source_factory,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            start_guard: Mutex::new(()),
            tasks: Mutex::new(JoinSet::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Runner that talks to the configured remote accounts.
    pub fn from_config(orchestrator: Arc<SyncOrchestrator>, config: Arc<Config>) -> Self {
        let max_concurrent_runs = config.sync.max_concurrent_runs;
        let factory: SourceFactory = Arc::new(move |account| {
            let client = AsaasClient::from_config(&config, account)?;
            Ok(Arc::new(client) as Arc<dyn RemoteSource>)
        });
        Self::new(orchestrator, factory, max_concurrent_runs)
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Start a run in the background and return its id once the
    /// IN_PROGRESS row exists.
    ///
    /// # Errors
    /// `AlreadyRunning` when the account has an open run, `ShuttingDown`
    /// after [`SyncJobRunner::shutdown`], otherwise the setup error.
    #[instrument(skip(self), fields(account = %request.account))]
    pub async fn submit(&self, request: SyncRequest) -> std::result::Result<RunId, JobError> {
        let (handle, source) = self.prepare(request).await?;
        let run_id = handle.id();

        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancellation.child_token();

        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            // A closed semaphore means shutdown; the cancelled token still
            // closes the run row.
            let _permit = permits.acquire_owned().await.ok();
            match orchestrator.drive(handle, source, cancel).await {
                Ok(run) => debug!(run_id = %run.id, status = run.status.as_str(), "background run closed"),
                Err(err) => error!(run_id = %run_id, error = %err, "failed to close background run"),
            }
        });

        Ok(run_id)
    }

    /// Run to completion on the caller's task.
    ///
    /// # Errors
    /// Same as [`SyncJobRunner::submit`], plus run-log failures.
    #[instrument(skip(self, cancel), fields(account = %request.account))]
    pub async fn run_foreground(
        &self,
        request: SyncRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<SyncRun, JobError> {
        let (handle, source) = self.prepare(request).await?;
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            // Shut down while waiting: close the row so it does not keep
            // the account busy.
            cancel.cancel();
            self.orchestrator.drive(handle, source, cancel).await?;
            return Err(JobError::ShuttingDown);
        };
        Ok(self.orchestrator.drive(handle, source, cancel).await?)
    }

    /// Validation report for `account` against its remote totals.
    ///
    /// # Errors
    /// Returns the remote or repository error.
    pub async fn validate(&self, account: Account) -> Result<ValidationReport> {
        let source = (self.source_factory)(account)?;
        self.orchestrator.validate(source.as_ref(), account).await
    }

    /// Background runs not yet reaped.
    pub async fn active_jobs(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancel background runs and wait up to `timeout` for them to close.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancellation.cancel();
        self.permits.close();

        let mut tasks = self.tasks.lock().await;
        let pending = tasks.len();
        if pending == 0 {
            return;
        }

        info!(pending, "waiting for background sync runs to stop");
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "background sync task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "background sync runs still running, aborting");
            tasks.abort_all();
        }
    }

    async fn prepare(
        &self,
        request: SyncRequest,
    ) -> std::result::Result<(RunHandle, Arc<dyn RemoteSource>), JobError> {
        if self.cancellation.is_cancelled() {
            return Err(JobError::ShuttingDown);
        }

        let source = (self.source_factory)(request.account)?;

        let _guard = self.start_guard.lock().await;
        if let Some(open) = self.orchestrator.run_log().find_in_progress(request.account).await? {
            warn!(account = %request.account, run_id = %open.id, "run refused: account busy");
            return Err(JobError::AlreadyRunning { account: request.account, run_id: open.id });
        }

        let handle = self.orchestrator.open_run(request).await?;
        Ok((handle, source))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use billsync_core::{FetchSettings, SyncSettings};
    use billsync_domain::{
        BillSyncError, Page, PageRequest, RemoteCharge, RemoteCustomer, RunStatus,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::database::{
        DbManager, SqliteChargeRepository, SqliteCustomerRepository, SqliteSyncRunRepository,
    };

    /// Remote with one customer and no charges that can be held open.
    struct GatedRemote {
        gate: CancellationToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteSource for GatedRemote {
        async fn list_customers(&self, _page: PageRequest) -> Result<Page<RemoteCustomer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.cancelled().await;
            let customer: RemoteCustomer =
                serde_json::from_value(serde_json::json!({"id": "cus_1", "name": "Maria"}))
                    .map_err(|e| BillSyncError::Internal(e.to_string()))?;
            Ok(Page { records: vec![customer], rejected: vec![], has_more: false, total_count: 1 })
        }

        async fn list_charges(
            &self,
            _customer: Option<&str>,
            _page: PageRequest,
        ) -> Result<Page<RemoteCharge>> {
            Ok(Page { records: vec![], rejected: vec![], has_more: false, total_count: 0 })
        }
    }

    fn runner(dir: &TempDir, remote: Arc<GatedRemote>) -> SyncJobRunner {
        runner_with_permits(dir, remote, 2)
    }

    fn runner_with_permits(
        dir: &TempDir,
        remote: Arc<GatedRemote>,
        max_runs: usize,
    ) -> SyncJobRunner {
        let db = Arc::new(DbManager::new(dir.path().join("jobs.db"), 4).unwrap());
        db.run_migrations().unwrap();
        let settings = SyncSettings {
            fetch: FetchSettings {
                page_size: 10,
                customer_page_delay: Duration::ZERO,
                charge_page_delay: Duration::ZERO,
            },
            charge_concurrency: 2,
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(SqliteCustomerRepository::new(Arc::clone(&db))),
            Arc::new(SqliteChargeRepository::new(Arc::clone(&db))),
            Arc::new(SqliteSyncRunRepository::new(db)),
            settings,
        ));
        let factory: SourceFactory =
            Arc::new(move |_| Ok(Arc::clone(&remote) as Arc<dyn RemoteSource>));
        SyncJobRunner::new(orchestrator, factory, max_runs)
    }

    fn gated() -> Arc<GatedRemote> {
        Arc::new(GatedRemote { gate: CancellationToken::new(), calls: AtomicUsize::new(0) })
    }

    async fn wait_for_status(runner: &SyncJobRunner, id: RunId) -> SyncRun {
        for _ in 0..200 {
            let run = runner.orchestrator().run_log().get_run(&id).await.unwrap().unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} never finished");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_refuses_second_run_for_same_account() {
        let dir = TempDir::new().unwrap();
        let remote = gated();
        let runner = runner(&dir, Arc::clone(&remote));

        let first = runner.submit(SyncRequest::full(Account::Primary, false, "test")).await.unwrap();
        let second = runner.submit(SyncRequest::full(Account::Primary, false, "test")).await;
        assert!(matches!(second, Err(JobError::AlreadyRunning { run_id, .. }) if run_id == first));

        let other = runner.submit(SyncRequest::full(Account::Alternate, false, "test")).await;
        assert!(other.is_ok(), "other accounts are independent");

        remote.gate.cancel();
        assert_eq!(wait_for_status(&runner, first).await.status, RunStatus::Success);
        assert!(runner.submit(SyncRequest::full(Account::Primary, false, "test")).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreground_run_returns_closed_row() {
        let dir = TempDir::new().unwrap();
        let remote = gated();
        remote.gate.cancel();
        let runner = runner(&dir, remote);

        let run = runner
            .run_foreground(SyncRequest::full(Account::Primary, true, "cli"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.customers.created, 1);
        assert_eq!(run.triggered_by, "cli");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_cancels_background_runs() {
        let dir = TempDir::new().unwrap();
        let remote = gated();
        let runner = runner(&dir, Arc::clone(&remote));

        let id = runner.submit(SyncRequest::full(Account::Primary, false, "test")).await.unwrap();
        runner.shutdown(Duration::from_secs(5)).await;

        let run = runner.orchestrator().run_log().get_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(runner.active_jobs().await, 0);
        assert!(matches!(
            runner.submit(SyncRequest::full(Account::Primary, false, "test")).await,
            Err(JobError::ShuttingDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreground_run_waiting_at_shutdown_closes_its_row() {
        let dir = TempDir::new().unwrap();
        let remote = gated();
        let runner = Arc::new(runner_with_permits(&dir, Arc::clone(&remote), 1));

        runner.submit(SyncRequest::full(Account::Primary, false, "test")).await.unwrap();
        // The background run holds the only permit once it is listing.
        while remote.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let waiting = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move {
                runner
                    .run_foreground(
                        SyncRequest::full(Account::Alternate, false, "cli"),
                        CancellationToken::new(),
                    )
                    .await
            }
        });

        let run_log = Arc::clone(runner.orchestrator().run_log());
        let mut opened = None;
        for _ in 0..200 {
            opened = run_log.find_in_progress(Account::Alternate).await.unwrap();
            if opened.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let opened = opened.expect("foreground run row never opened");

        runner.shutdown(Duration::from_secs(5)).await;

        assert!(matches!(waiting.await.unwrap(), Err(JobError::ShuttingDown)));
        assert!(run_log.find_in_progress(Account::Alternate).await.unwrap().is_none());
        let closed = run_log.get_run(&opened.id).await.unwrap().unwrap();
        assert_eq!(closed.status, RunStatus::Error);
    }
}
