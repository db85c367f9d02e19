//! Row mapping and error helpers shared by the SQLite repositories.

use std::str::FromStr;

use billsync_common::{ErrorClassification, StorageError};
use billsync_domain::{Account, BillSyncError};
use rusqlite::types::Type;
use rusqlite::Row;
use tokio::task;
use tracing::{error, warn};

use crate::errors::InfraError;

pub(crate) fn map_sql_error(err: rusqlite::Error) -> BillSyncError {
    BillSyncError::from(InfraError::from(err))
}

pub(crate) fn map_storage_error(err: StorageError) -> BillSyncError {
    if err.is_critical() {
        error!(error = %err, severity = %err.severity(), "storage failure");
    } else if err.is_retryable() {
        warn!(error = %err, "transient storage failure");
    }
    BillSyncError::from(InfraError::from(err))
}

pub(crate) fn map_join_error(err: task::JoinError) -> BillSyncError {
    if err.is_cancelled() {
        BillSyncError::Internal("database task cancelled".into())
    } else {
        BillSyncError::Internal(format!("database task panic: {err}"))
    }
}

/// Read a TEXT column through its `FromStr` impl.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = BillSyncError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn account_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Account> {
    parse_column(row, idx)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn int_to_bool(value: i64) -> bool {
    value != 0
}

pub(crate) fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn i64_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
