//! Application context - dependency injection container

use std::sync::Arc;
use std::time::Duration;

use billsync_core::{ChargeRepository, CustomerRepository, SyncOrchestrator, SyncRunLog, SyncSettings};
use billsync_domain::constants::ABANDONED_RUN_REASON;
use billsync_domain::{BillSyncError, Config, Result};
use billsync_infra::{
    DbManager, SqliteChargeRepository, SqliteCustomerRepository, SqliteSyncRunRepository,
    SyncJobRunner,
};
use tokio::task;
use tracing::{info, warn};

use crate::utils::health::{ComponentHealth, HealthStatus};

/// Upper bound for one health probe of the database.
const DB_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a command or request handler needs, built once per process.
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Arc<DbManager>,
    pub customers: Arc<dyn CustomerRepository>,
    pub charges: Arc<dyn ChargeRepository>,
    pub run_log: Arc<dyn SyncRunLog>,
    pub runner: Arc<SyncJobRunner>,
}

impl AppContext {
    /// Open the database, bring its schema up to date and wire the engine.
    ///
    /// # Errors
    /// Returns the pool or migration error.
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let db_config = config.database.clone();
        let db = task::spawn_blocking(move || -> Result<DbManager> {
            let db = DbManager::from_config(&db_config)?;
            db.run_migrations()?;
            Ok(db)
        })
        .await
        .map_err(|e| BillSyncError::Internal(format!("database setup task failed: {e}")))??;
        let db = Arc::new(db);
        info!(path = %db.path().display(), "database ready");

        let customers: Arc<dyn CustomerRepository> =
            Arc::new(SqliteCustomerRepository::new(Arc::clone(&db)));
        let charges: Arc<dyn ChargeRepository> =
            Arc::new(SqliteChargeRepository::new(Arc::clone(&db)));
        let run_log: Arc<dyn SyncRunLog> = Arc::new(SqliteSyncRunRepository::new(Arc::clone(&db)));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&customers),
            Arc::clone(&charges),
            Arc::clone(&run_log),
            SyncSettings::from(config.as_ref()),
        ));
        let runner = Arc::new(SyncJobRunner::from_config(orchestrator, Arc::clone(&config)));

        Ok(Self { config, db, customers, charges, run_log, runner })
    }

    /// Close runs a previous process left IN_PROGRESS.
    ///
    /// Only the process that owns sync execution (`serve`, `sync`) calls
    /// this; read-only commands must not touch another process's runs.
    ///
    /// # Errors
    /// Returns the run-log error.
    pub async fn close_abandoned_runs(&self) -> Result<u64> {
        let closed = self.run_log.close_abandoned(ABANDONED_RUN_REASON).await?;
        if closed > 0 {
            warn!(closed, "closed sync runs abandoned by a previous process");
        }
        Ok(closed)
    }

    /// Probe the components a trigger request depends on.
    pub async fn health_check(&self) -> HealthStatus {
        let runner = ComponentHealth::healthy("runner")
            .with_message(format!("{} background run(s)", self.runner.active_jobs().await));

        HealthStatus::from_components(vec![self.check_database_health().await, runner])
    }

    async fn check_database_health(&self) -> ComponentHealth {
        let db = Arc::clone(&self.db);
        let probe = tokio::time::timeout(
            DB_HEALTH_TIMEOUT,
            task::spawn_blocking(move || db.health_check()),
        )
        .await;

        match probe {
            Ok(Ok(Ok(()))) => ComponentHealth::healthy("database"),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "database health check failed");
                ComponentHealth::unhealthy("database", format!("query failed: {e}"))
            }
            Ok(Err(e)) => ComponentHealth::unhealthy("database", format!("task panic: {e}")),
            Err(_) => ComponentHealth::unhealthy("database", "health check timed out"),
        }
    }

    /// Cancel background runs and wait for their rows to close.
    pub async fn shutdown(&self, timeout: Duration) {
        self.runner.shutdown(timeout).await;
        info!("application context shut down");
    }
}
