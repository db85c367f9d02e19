//! SQLite persistence for the local mirror and the run log.

mod charge_repository;
mod customer_repository;
mod helpers;
mod manager;
mod sync_run_repository;

pub use charge_repository::SqliteChargeRepository;
pub use customer_repository::SqliteCustomerRepository;
pub use manager::DbManager;
pub use sync_run_repository::SqliteSyncRunRepository;
