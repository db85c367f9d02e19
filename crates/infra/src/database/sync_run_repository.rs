//! Persistent run log.
//!
//! Every run gets an `IN_PROGRESS` row before any remote call and exactly
//! one terminal update. Terminal rows are never rewritten.

use std::sync::Arc;

use async_trait::async_trait;
use billsync_core::SyncRunLog;
use billsync_domain::{
    Account, EntityCounts, NewSyncRun, Result, RunCompletion, RunId, RunStatus, SyncPhase, SyncRun,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;
use tracing::{info, instrument, warn};

use super::helpers::{
    account_column, bool_to_int, i64_to_u64, int_to_bool, map_join_error, map_sql_error,
    parse_column, u64_to_i64,
};
use super::manager::DbManager;

const RUN_COLUMNS: &str = "id, kind, account, status, phase, triggered_by, reconcile_requested, \
     started_at, finished_at, duration_ms, \
     customers_seen, customers_created, customers_updated, customers_unchanged, \
     customers_orphaned, customers_removed, customers_errors, \
     charges_seen, charges_created, charges_updated, charges_unchanged, \
     charges_orphaned, charges_removed, charges_errors, \
     summary, error_detail";

pub struct SqliteSyncRunRepository {
    db: Arc<DbManager>,
}

impl SqliteSyncRunRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncRunLog for SqliteSyncRunRepository {
    #[instrument(skip(self, run), fields(run_id = %run.id, account = %run.account))]
    async fn start_run(&self, run: &NewSyncRun) -> Result<RunId> {
        let db = Arc::clone(&self.db);
        let run = run.clone();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO sync_runs (id, kind, account, status, phase, triggered_by, \
                 reconcile_requested, started_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run.id.to_string(),
                    run.kind.as_str(),
                    run.account.as_str(),
                    RunStatus::InProgress.as_str(),
                    SyncPhase::Init.as_str(),
                    run.triggered_by,
                    bool_to_int(run.reconcile_requested),
                    run.started_at,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(run.id)
        })
        .await
        .map_err(map_join_error)?
    }

    #[instrument(skip(self, completion), fields(status = completion.status.as_str()))]
    async fn finish_run(&self, id: &RunId, completion: &RunCompletion) -> Result<()> {
        let db = Arc::clone(&self.db);
        let id = *id;
        let completion = completion.clone();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let customers = &completion.customers;
            let charges = &completion.charges;
            let updated = conn
                .execute(
                    "UPDATE sync_runs SET status = ?1, phase = ?2, finished_at = ?3, \
                     duration_ms = ?4, \
                     customers_seen = ?5, customers_created = ?6, customers_updated = ?7, \
                     customers_unchanged = ?8, customers_orphaned = ?9, customers_removed = ?10, \
                     customers_errors = ?11, \
                     charges_seen = ?12, charges_created = ?13, charges_updated = ?14, \
                     charges_unchanged = ?15, charges_orphaned = ?16, charges_removed = ?17, \
                     charges_errors = ?18, \
                     summary = ?19, error_detail = ?20 \
                     WHERE id = ?21 AND status = 'IN_PROGRESS'",
                    params![
                        completion.status.as_str(),
                        completion.phase.as_str(),
                        completion.finished_at,
                        u64_to_i64(completion.duration_ms),
                        u64_to_i64(customers.seen),
                        u64_to_i64(customers.created),
                        u64_to_i64(customers.updated),
                        u64_to_i64(customers.unchanged),
                        u64_to_i64(customers.orphaned),
                        u64_to_i64(customers.removed),
                        u64_to_i64(customers.errors),
                        u64_to_i64(charges.seen),
                        u64_to_i64(charges.created),
                        u64_to_i64(charges.updated),
                        u64_to_i64(charges.unchanged),
                        u64_to_i64(charges.orphaned),
                        u64_to_i64(charges.removed),
                        u64_to_i64(charges.errors),
                        completion.summary,
                        completion.error_detail,
                        id.to_string(),
                    ],
                )
                .map_err(map_sql_error)?;

            if updated == 0 {
                warn!(run_id = %id, "run already closed or unknown; completion ignored");
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<SyncRun>> {
        let db = Arc::clone(&self.db);
        let id = *id;

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1");
            conn.query_row(&sql, params![id.to_string()], run_from_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let runs = stmt
                .query_map(params![limit], run_from_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(runs)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_in_progress(&self, account: Account) -> Result<Option<SyncRun>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs WHERE account = ?1 AND status = 'IN_PROGRESS' \
                 ORDER BY started_at DESC LIMIT 1"
            );
            conn.query_row(&sql, params![account.as_str()], run_from_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    #[instrument(skip(self))]
    async fn close_abandoned(&self, reason: &str) -> Result<u64> {
        let db = Arc::clone(&self.db);
        let reason = reason.to_string();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let closed = conn
                .execute(
                    "UPDATE sync_runs SET status = ?1, phase = ?2, finished_at = ?3, \
                     error_detail = ?4 WHERE status = 'IN_PROGRESS'",
                    params![
                        RunStatus::Error.as_str(),
                        SyncPhase::Failed.as_str(),
                        Utc::now(),
                        reason,
                    ],
                )
                .map_err(map_sql_error)?;

            if closed > 0 {
                info!(closed, "closed runs left in progress by a previous process");
            }
            Ok(closed as u64)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn counts_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<EntityCounts> {
    let column = |offset: usize| row.get::<_, i64>(start + offset).map(i64_to_u64);
    Ok(EntityCounts {
        seen: column(0)?,
        created: column(1)?,
        updated: column(2)?,
        unchanged: column(3)?,
        orphaned: column(4)?,
        removed: column(5)?,
        errors: column(6)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    Ok(SyncRun {
        id: parse_column(row, 0)?,
        kind: parse_column(row, 1)?,
        account: account_column(row, 2)?,
        status: parse_column(row, 3)?,
        phase: parse_column(row, 4)?,
        triggered_by: row.get(5)?,
        reconcile_requested: int_to_bool(row.get(6)?),
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        duration_ms: row.get::<_, Option<i64>>(9)?.map(i64_to_u64),
        customers: counts_from_row(row, 10)?,
        charges: counts_from_row(row, 17)?,
        summary: row.get(24)?,
        error_detail: row.get(25)?,
    })
}

#[cfg(test)]
mod tests {
    use billsync_domain::RunKind;
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;

    fn setup() -> (TempDir, SqliteSyncRunRepository) {
        let dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(DbManager::new(dir.path().join("runs.db"), 2).unwrap());
        db.run_migrations().unwrap();
        (dir, SqliteSyncRunRepository::new(db))
    }

    fn new_run(account: Account, minutes_ago: i64) -> NewSyncRun {
        NewSyncRun {
            id: RunId::new(),
            kind: RunKind::Full,
            account,
            triggered_by: "cli".into(),
            reconcile_requested: true,
            started_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn completion(status: RunStatus) -> RunCompletion {
        RunCompletion {
            status,
            phase: SyncPhase::Done,
            finished_at: Utc::now(),
            duration_ms: 1_250,
            customers: EntityCounts { seen: 150, created: 150, ..EntityCounts::default() },
            charges: EntityCounts { seen: 40, created: 38, orphaned: 2, ..EntityCounts::default() },
            summary: "customers 150 seen".into(),
            error_detail: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_then_finish_round_trips() {
        let (_dir, repo) = setup();
        let run = new_run(Account::Primary, 0);
        let id = repo.start_run(&run).await.unwrap();

        let open = repo.get_run(&id).await.unwrap().expect("run stored");
        assert_eq!(open.status, RunStatus::InProgress);
        assert_eq!(open.phase, SyncPhase::Init);
        assert!(open.finished_at.is_none());
        assert!(open.reconcile_requested);

        repo.finish_run(&id, &completion(RunStatus::Success)).await.unwrap();

        let closed = repo.get_run(&id).await.unwrap().unwrap();
        assert_eq!(closed.status, RunStatus::Success);
        assert_eq!(closed.duration_ms, Some(1_250));
        assert_eq!(closed.customers.created, 150);
        assert_eq!(closed.charges.orphaned, 2);
        assert_eq!(closed.summary.as_deref(), Some("customers 150 seen"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminal_rows_are_not_rewritten() {
        let (_dir, repo) = setup();
        let id = repo.start_run(&new_run(Account::Primary, 0)).await.unwrap();

        repo.finish_run(&id, &completion(RunStatus::Partial)).await.unwrap();
        repo.finish_run(&id, &completion(RunStatus::Success)).await.unwrap();

        assert_eq!(repo.get_run(&id).await.unwrap().unwrap().status, RunStatus::Partial);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_recent_is_newest_first_and_bounded() {
        let (_dir, repo) = setup();
        let oldest = repo.start_run(&new_run(Account::Primary, 30)).await.unwrap();
        let middle = repo.start_run(&new_run(Account::Alternate, 20)).await.unwrap();
        let newest = repo.start_run(&new_run(Account::Primary, 10)).await.unwrap();

        let runs = repo.list_recent(2).await.unwrap();
        let ids: Vec<_> = runs.iter().map(|run| run.id).collect();
        assert_eq!(ids, vec![newest, middle]);
        assert!(!ids.contains(&oldest));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn find_in_progress_is_per_account() {
        let (_dir, repo) = setup();
        let id = repo.start_run(&new_run(Account::Alternate, 0)).await.unwrap();

        assert!(repo.find_in_progress(Account::Primary).await.unwrap().is_none());
        assert_eq!(repo.find_in_progress(Account::Alternate).await.unwrap().unwrap().id, id);

        repo.finish_run(&id, &completion(RunStatus::Success)).await.unwrap();
        assert!(repo.find_in_progress(Account::Alternate).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_abandoned_marks_open_runs_failed() {
        let (_dir, repo) = setup();
        let open = repo.start_run(&new_run(Account::Primary, 5)).await.unwrap();
        let done = repo.start_run(&new_run(Account::Alternate, 5)).await.unwrap();
        repo.finish_run(&done, &completion(RunStatus::Success)).await.unwrap();

        assert_eq!(repo.close_abandoned("process restarted").await.unwrap(), 1);

        let run = repo.get_run(&open).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.phase, SyncPhase::Failed);
        assert_eq!(run.error_detail.as_deref(), Some("process restarted"));
        assert!(run.finished_at.is_some());
        assert_eq!(repo.get_run(&done).await.unwrap().unwrap().status, RunStatus::Success);
    }
}
