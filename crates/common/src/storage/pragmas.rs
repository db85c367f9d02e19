//! SQLite pragma management
//!
//! Applied to every pooled connection when it is opened.

use rusqlite::Connection;

use super::pool::SqlitePoolConfig;
use crate::storage::error::{StorageError, StorageResult};

/// Apply connection-level pragmas
///
/// - WAL journal (readers never block the single writer)
/// - NORMAL synchronous mode
/// - Foreign key constraints
/// - Busy timeout for lock contention between pooled connections
pub fn apply_connection_pragmas(conn: &Connection, config: &SqlitePoolConfig) -> StorageResult<()> {
    let mut pragma_sql = String::new();

    if config.enable_wal {
        pragma_sql.push_str("PRAGMA journal_mode=WAL;\n");
    }
    pragma_sql.push_str("PRAGMA synchronous=NORMAL;\n");
    if config.enable_foreign_keys {
        pragma_sql.push_str("PRAGMA foreign_keys=ON;\n");
    }

    conn.execute_batch(&pragma_sql)
        .map_err(|e| StorageError::Query(format!("Failed to apply pragmas: {e}")))?;

    // Separate call, it takes a Duration
    conn.busy_timeout(config.busy_timeout)
        .map_err(|e| StorageError::Query(format!("Failed to set busy timeout: {e}")))?;

    Ok(())
}
