//! SQLite storage primitives
//!
//! Connection pooling (r2d2) with per-connection pragmas and the storage
//! error type. Schema management belongs to the application layer.

pub mod error;
pub mod pool;
pub mod pragmas;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use pool::{HealthStatus, PooledConnection, SqlitePool, SqlitePoolConfig};
pub use pragmas::apply_connection_pragmas;
