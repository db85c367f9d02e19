//! Conversions from external infrastructure errors into domain errors.

use billsync_common::StorageError;
use billsync_domain::BillSyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub BillSyncError);

impl From<InfraError> for BillSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<BillSyncError> for InfraError {
    fn from(value: BillSyncError) -> Self {
        Self(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoBillSyncError {
    fn into_billsync(self) -> BillSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → BillSyncError */
/* -------------------------------------------------------------------------- */

impl IntoBillSyncError for SqlError {
    fn into_billsync(self) -> BillSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        BillSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        BillSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        BillSyncError::Database("unique constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        BillSyncError::Database("foreign key constraint violation".into())
                    }
                    _ => BillSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => BillSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                BillSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                BillSyncError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidPath(path) => BillSyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => BillSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        Self(value.into_billsync())
    }
}

/* -------------------------------------------------------------------------- */
/* StorageError → BillSyncError */
/* -------------------------------------------------------------------------- */

impl IntoBillSyncError for StorageError {
    fn into_billsync(self) -> BillSyncError {
        match self {
            StorageError::Rusqlite(err) => err.into_billsync(),
            StorageError::Timeout(secs) => {
                BillSyncError::Database(format!("no database connection available after {secs}s"))
            }
            StorageError::InvalidConfig(message) => BillSyncError::Config(message),
            other => BillSyncError::Database(other.to_string()),
        }
    }
}

impl From<StorageError> for InfraError {
    fn from(value: StorageError) -> Self {
        Self(value.into_billsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → BillSyncError */
/* -------------------------------------------------------------------------- */

impl IntoBillSyncError for HttpError {
    fn into_billsync(self) -> BillSyncError {
        if self.is_timeout() {
            return BillSyncError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return BillSyncError::Network("HTTP connection failure".into());
        }

        if self.is_decode() {
            return BillSyncError::Remote(format!("undecodable response body: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => BillSyncError::Auth(message),
                404 => BillSyncError::NotFound(message),
                429 => BillSyncError::RateLimited(message),
                400..=499 => BillSyncError::Remote(message),
                _ => BillSyncError::Network(message),
            };
        }

        BillSyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        Self(value.into_billsync())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode};
    use rusqlite::ffi::{Error as FfiError, ErrorCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn sqlite_busy_maps_to_database_error() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::DatabaseBusy, extended_code: 5 },
            Some("database is locked".into()),
        );

        let mapped: BillSyncError = InfraError::from(err).into();
        match mapped {
            BillSyncError::Database(msg) => assert!(msg.contains("busy")),
            other => panic!("expected database error, got {other:?}"),
        }
    }

    #[test]
    fn foreign_key_violation_is_named() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::ConstraintViolation, extended_code: 787 },
            None,
        );

        let mapped: BillSyncError = InfraError::from(err).into();
        assert_eq!(mapped, BillSyncError::Database("foreign key constraint violation".into()));
    }

    #[test]
    fn storage_timeout_maps_to_database_error() {
        let mapped: BillSyncError = InfraError::from(StorageError::Timeout(5)).into();
        assert!(matches!(mapped, BillSyncError::Database(msg) if msg.contains("5s")));
    }

    #[tokio::test]
    async fn http_status_401_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(StatusCode::UNAUTHORIZED))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err();

        let mapped: BillSyncError = InfraError::from(error).into();
        match mapped {
            BillSyncError::Auth(msg) => assert!(msg.contains("401")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }
}
