//! Shared harness for infra integration tests: a temporary SQLite mirror,
//! a job runner wired to it, and canned remote payloads.

use std::sync::Arc;

use billsync_core::{SyncOrchestrator, SyncSettings};
use billsync_domain::{Account, Config, CredentialSet};
use billsync_infra::database::{
    DbManager, SqliteChargeRepository, SqliteCustomerRepository, SqliteSyncRunRepository,
};
use billsync_infra::SyncJobRunner;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const TOKEN: &str = "$aact_test_token";

/// Temporary mirror plus a runner that talks to `base_url`.
pub struct Harness {
    pub db: Arc<DbManager>,
    pub runner: Arc<SyncJobRunner>,
    pub config: Arc<Config>,
    _temp_dir: TempDir,
}

impl Harness {
    pub fn new(base_url: &str, page_size: u32) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db = Arc::new(
            DbManager::new(temp_dir.path().join("mirror.db"), 4)
                .expect("db manager should be created"),
        );
        db.run_migrations().expect("schema should apply");

        let config = Arc::new(test_config(base_url, page_size));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(SqliteCustomerRepository::new(Arc::clone(&db))),
            Arc::new(SqliteChargeRepository::new(Arc::clone(&db))),
            Arc::new(SqliteSyncRunRepository::new(Arc::clone(&db))),
            SyncSettings::from(config.as_ref()),
        ));
        let runner = Arc::new(SyncJobRunner::from_config(orchestrator, Arc::clone(&config)));

        Self { db, runner, config, _temp_dir: temp_dir }
    }
}

/// Configuration with every delay and cooldown collapsed for tests.
pub fn test_config(base_url: &str, page_size: u32) -> Config {
    let mut config = Config::default();
    config.accounts = vec![CredentialSet { name: Account::Primary, api_token: TOKEN.into() }];
    config.remote.base_url = base_url.to_string();
    config.remote.page_size = page_size;
    config.remote.timeout_secs = 5;
    config.remote.min_interval_ms = 0;
    config.remote.burst_cooldown_ms = 0;
    config.remote.rate_limit_cooldown_secs = 0;
    config.remote.forbidden_cooldown_secs = 0;
    config.remote.backoff_base_ms = 10;
    config.remote.backoff_max_ms = 20;
    config.sync.customer_page_delay_ms = 0;
    config.sync.charge_page_delay_ms = 0;
    config.sync.charge_concurrency = 2;
    config
}

pub fn customer_json(id: &str, name: &str) -> Value {
    json!({
        "object": "customer",
        "id": id,
        "name": name,
        "cpfCnpj": "24971563792",
        "email": format!("{id}@example.com"),
        "dateCreated": "2024-03-11",
        "deleted": false
    })
}

pub fn charge_json(id: &str, customer: &str, value: f64) -> Value {
    json!({
        "object": "payment",
        "id": id,
        "customer": customer,
        "value": value,
        "netValue": value,
        "billingType": "PIX",
        "status": "PENDING",
        "dueDate": "2024-07-10",
        "dateCreated": "2024-06-01",
        "deleted": false
    })
}

pub fn envelope(data: Vec<Value>, has_more: bool, total_count: u64) -> Value {
    json!({
        "object": "list",
        "hasMore": has_more,
        "totalCount": total_count,
        "limit": data.len(),
        "offset": 0,
        "data": data
    })
}
