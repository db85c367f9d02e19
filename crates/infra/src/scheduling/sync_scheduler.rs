//! Cron-driven sync scheduler.
//!
//! On every tick the scheduler submits one full run per scheduled account to
//! the [`SyncJobRunner`]. Accounts that still have a run in progress are
//! skipped for that tick. Join handles are tracked, cancellation is
//! explicit, and every lifecycle operation is wrapped in a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use billsync_domain::Account;
//! use billsync_infra::scheduling::{SchedulerResult, SyncJobRunner, SyncScheduler, SyncSchedulerConfig};
//!
//! # async fn example(runner: Arc<SyncJobRunner>) -> SchedulerResult<()> {
//! let mut scheduler = SyncScheduler::new(
//!     SyncSchedulerConfig {
//!         cron_expression: "0 0 */6 * * *".into(),
//!         accounts: vec![Account::Primary],
//!         ..Default::default()
//!     },
//!     runner,
//! );
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use billsync_domain::constants::SCHEDULER_TRIGGER;
use billsync_domain::{Account, Config, SyncRequest};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{JobError, SchedulerError, SchedulerResult};
use super::job_runner::SyncJobRunner;

/// Configuration for the sync scheduler.
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Six-field cron expression (seconds first).
    pub cron_expression: String,
    pub accounts: Vec<Account>,
    pub reconcile: bool,
    /// Timeout applied to submitting one tick's runs.
    pub job_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 0 */6 * * *".into(),
            accounts: Account::ALL.to_vec(),
            reconcile: false,
            job_timeout: Duration::from_secs(30),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl SyncSchedulerConfig {
    /// Scheduler settings from `sync.schedule`; `None` when no schedule is
    /// configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let cron_expression = config.sync.schedule.clone()?;
        let configured = config.configured_accounts();
        let accounts = if config.sync.scheduled_accounts.is_empty() {
            configured
        } else {
            config
                .sync
                .scheduled_accounts
                .iter()
                .copied()
                .filter(|account| configured.contains(account))
                .collect()
        };
        Some(Self {
            cron_expression,
            accounts,
            reconcile: config.sync.reconcile_on_schedule,
            ..Self::default()
        })
    }
}

/// Sync scheduler with explicit lifecycle management.
pub struct SyncScheduler {
    scheduler: Option<JobScheduler>,
    config: SyncSchedulerConfig,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
    runner: Arc<SyncJobRunner>,
}

impl SyncScheduler {
    pub fn new(config: SyncSchedulerConfig, runner: Arc<SyncJobRunner>) -> Self {
        Self {
            scheduler: None,
            config,
            monitor_handle: None,
            cancellation: CancellationToken::new(),
            runner,
        }
    }

    pub fn config(&self) -> &SyncSchedulerConfig {
        &self.config
    }

    /// Start the scheduler, spawning the monitoring task.
    ///
    /// # Errors
    /// `AlreadyRunning`, an invalid cron expression, or a start timeout.
    #[instrument(skip(self), fields(cron = %self.config.cron_expression))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler_instance = self.build_scheduler().await?;
        let start_timeout = self.config.start_timeout;

        tokio::time::timeout(start_timeout, scheduler_instance.start())
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: start_timeout.as_secs() })?
            .map_err(|e| SchedulerError::StartFailed(e.to_string()))?;

        self.scheduler = Some(scheduler_instance);

        let cancel = self.cancellation.clone();
        self.monitor_handle = Some(tokio::spawn(async move {
            cancel.cancelled().await;
            debug!("sync scheduler monitor cancelled");
        }));

        info!(accounts = ?self.config.accounts, "sync scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    ///
    /// # Errors
    /// `NotRunning`, a stop failure, or a timeout.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(SchedulerError::NotRunning);
        };

        self.cancellation.cancel();

        let stop_timeout = self.config.stop_timeout;
        tokio::time::timeout(stop_timeout, scheduler.shutdown())
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: stop_timeout.as_secs() })?
            .map_err(|e| SchedulerError::StopFailed(e.to_string()))?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })?
                .map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        }

        info!("sync scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Submit one tick's runs immediately; returns how many were accepted.
    pub async fn trigger_now(&self) -> usize {
        submit_tick(&self.runner, &self.config.accounts, self.config.reconcile).await
    }

    async fn build_scheduler(&self) -> SchedulerResult<JobScheduler> {
        let scheduler =
            JobScheduler::new().await.map_err(|e| SchedulerError::CreationFailed(e.to_string()))?;

        let runner = Arc::clone(&self.runner);
        let accounts = self.config.accounts.clone();
        let reconcile = self.config.reconcile;
        let job_timeout = self.config.job_timeout;

        let job = Job::new_async(self.config.cron_expression.as_str(), move |_id, _lock| {
            let runner = Arc::clone(&runner);
            let accounts = accounts.clone();

            Box::pin(async move {
                match tokio::time::timeout(job_timeout, submit_tick(&runner, &accounts, reconcile))
                    .await
                {
                    Ok(submitted) => debug!(submitted, "scheduled sync tick finished"),
                    Err(_) => {
                        warn!(timeout_secs = job_timeout.as_secs(), "scheduled sync tick timed out");
                    }
                }
            })
        })
        .map_err(|e| SchedulerError::JobRegistrationFailed(e.to_string()))?;

        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobRegistrationFailed(e.to_string()))?;

        debug!(cron = %self.config.cron_expression, %job_id, "registered sync job");
        Ok(scheduler)
    }
}

async fn submit_tick(runner: &SyncJobRunner, accounts: &[Account], reconcile: bool) -> usize {
    let mut submitted = 0;
    for &account in accounts {
        match runner.submit(SyncRequest::full(account, reconcile, SCHEDULER_TRIGGER)).await {
            Ok(run_id) => {
                submitted += 1;
                info!(%account, %run_id, "scheduled sync submitted");
            }
            Err(JobError::AlreadyRunning { run_id, .. }) => {
                info!(%account, %run_id, "scheduled sync skipped: previous run still in progress");
            }
            Err(err) => warn!(%account, error = %err, "scheduled sync could not start"),
        }
    }
    submitted
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use billsync_core::{FetchSettings, RemoteSource, SyncOrchestrator, SyncSettings};
    use billsync_domain::{
        CredentialSet, Page, PageRequest, RemoteCharge, RemoteCustomer, Result as DomainResult,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::database::{
        DbManager, SqliteChargeRepository, SqliteCustomerRepository, SqliteSyncRunRepository,
    };
    use crate::scheduling::job_runner::SourceFactory;

    struct StalledRemote;

    #[async_trait]
    impl RemoteSource for StalledRemote {
        async fn list_customers(&self, _page: PageRequest) -> DomainResult<Page<RemoteCustomer>> {
            std::future::pending().await
        }

        async fn list_charges(
            &self,
            _customer: Option<&str>,
            _page: PageRequest,
        ) -> DomainResult<Page<RemoteCharge>> {
            std::future::pending().await
        }
    }

    fn runner(dir: &TempDir) -> Arc<SyncJobRunner> {
        let db = Arc::new(DbManager::new(dir.path().join("scheduler.db"), 4).unwrap());
        db.run_migrations().unwrap();
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(SqliteCustomerRepository::new(Arc::clone(&db))),
            Arc::new(SqliteChargeRepository::new(Arc::clone(&db))),
            Arc::new(SqliteSyncRunRepository::new(db)),
            SyncSettings {
                fetch: FetchSettings {
                    page_size: 10,
                    customer_page_delay: Duration::ZERO,
                    charge_page_delay: Duration::ZERO,
                },
                charge_concurrency: 1,
            },
        ));
        let factory: SourceFactory = Arc::new(|_| Ok(Arc::new(StalledRemote) as Arc<dyn RemoteSource>));
        Arc::new(SyncJobRunner::new(orchestrator, factory, 2))
    }

    #[test]
    fn config_without_schedule_disables_scheduler() {
        assert!(SyncSchedulerConfig::from_config(&Config::default()).is_none());
    }

    #[test]
    fn scheduled_accounts_must_have_credentials() {
        let mut config = Config::default();
        config.accounts = vec![CredentialSet { name: Account::Alternate, api_token: "t".into() }];
        config.sync.schedule = Some("0 0 3 * * *".into());
        config.sync.scheduled_accounts = vec![Account::Primary, Account::Alternate];
        config.sync.reconcile_on_schedule = true;

        let scheduler_config = SyncSchedulerConfig::from_config(&config).unwrap();
        assert_eq!(scheduler_config.accounts, vec![Account::Alternate]);
        assert!(scheduler_config.reconcile);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_start_stop() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = SyncScheduler::new(SyncSchedulerConfig::default(), runner(&dir));

        scheduler.start().await.expect("scheduler starts");
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

        scheduler.stop().await.expect("scheduler stops");
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_fails_registration() {
        let dir = TempDir::new().unwrap();
        let config =
            SyncSchedulerConfig { cron_expression: "every tuesday".into(), ..Default::default() };
        let mut scheduler = SyncScheduler::new(config, runner(&dir));

        assert!(matches!(scheduler.start().await, Err(SchedulerError::JobRegistrationFailed(_))));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tick_skips_accounts_with_open_runs() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let scheduler = SyncScheduler::new(SyncSchedulerConfig::default(), Arc::clone(&runner));

        assert_eq!(scheduler.trigger_now().await, 2);
        assert_eq!(scheduler.trigger_now().await, 0, "both accounts still busy");

        let runs = runner.orchestrator().run_log().list_recent(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|run| run.triggered_by == SCHEDULER_TRIGGER));

        runner.shutdown(Duration::from_secs(5)).await;
    }
}
