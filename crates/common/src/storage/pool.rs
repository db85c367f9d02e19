//! SQLite connection pool
//!
//! r2d2-based pooling for the local mirror database. Every connection gets
//! the pragmas from [`apply_connection_pragmas`] when it is opened.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, info, instrument, warn};

use super::pragmas::apply_connection_pragmas;
use crate::storage::error::{StorageError, StorageResult};

/// Pooled rusqlite connection, returned to the pool on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlitePoolConfig {
    /// Maximum number of connections (default: 8)
    pub max_size: u32,
    /// How long `get_connection` waits for a free connection
    pub connection_timeout: Duration,
    /// SQLite busy timeout applied per connection
    pub busy_timeout: Duration,
    pub enable_wal: bool,
    pub enable_foreign_keys: bool,
}

impl Default for SqlitePoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

/// Pool health snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
    pub message: Option<String>,
}

/// SQLite connection pool
#[derive(Debug)]
pub struct SqlitePool {
    pool: Pool<SqliteConnectionManager>,
    config: SqlitePoolConfig,
    path: PathBuf,
}

impl SqlitePool {
    /// Open (creating if needed) the database at `path` and build the pool.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the pragmas fail, or
    /// the first connection cannot be acquired.
    #[instrument(fields(db_path = ?path, pool_size = config.max_size))]
    pub fn new(path: &Path, config: SqlitePoolConfig) -> StorageResult<Self> {
        if config.max_size == 0 {
            return Err(StorageError::InvalidConfig("max_size must be at least 1".into()));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let pragma_config = config.clone();
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            apply_connection_pragmas(conn, &pragma_config)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| {
                warn!("Failed to create connection pool: {}", e);
                StorageError::Connection(format!("Failed to create pool: {e}"))
            })?;

        info!("SQLite pool created with {} connections", config.max_size);

        Ok(Self { pool, config, path: path.to_path_buf() })
    }

    /// Acquire a connection from the pool
    ///
    /// # Errors
    /// `StorageError::Timeout` when every connection stays busy past the
    /// configured timeout, `StorageError::Connection` otherwise.
    pub fn get_connection(&self) -> StorageResult<PooledConnection> {
        let start = Instant::now();
        match self.pool.get() {
            Ok(conn) => {
                debug!(elapsed_ms = start.elapsed().as_millis(), "connection acquired");
                Ok(conn)
            }
            Err(e) => {
                if e.to_string().to_lowercase().contains("timed out") {
                    warn!("Connection timeout after {:?}", self.config.connection_timeout);
                    Err(StorageError::Timeout(self.config.connection_timeout.as_secs()))
                } else {
                    warn!("Connection error: {}", e);
                    Err(StorageError::Connection(format!("Failed to get connection: {e}")))
                }
            }
        }
    }

    pub const fn max_size(&self) -> u32 {
        self.config.max_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that a connection can be acquired and answers a trivial query.
    pub fn health_check(&self) -> HealthStatus {
        let state = self.pool.state();
        let probe = self
            .get_connection()
            .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(Into::into));

        match probe {
            Ok(_) => HealthStatus {
                healthy: true,
                connections: state.connections,
                idle_connections: state.idle_connections,
                max_connections: self.config.max_size,
                message: None,
            },
            Err(e) => HealthStatus {
                healthy: false,
                connections: state.connections,
                idle_connections: state.idle_connections,
                max_connections: self.config.max_size,
                message: Some(format!("Pool unhealthy: {e}")),
            },
        }
    }
}
