//! Scheduler and job runner error types

use billsync_domain::{Account, BillSyncError, RunId};
use thiserror::Error;

use crate::errors::InfraError;

/// Scheduler lifecycle errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    #[error("Failed to create scheduler: {0}")]
    CreationFailed(String),

    #[error("Failed to start scheduler: {0}")]
    StartFailed(String),

    #[error("Failed to stop scheduler: {0}")]
    StopFailed(String),

    #[error("Failed to register job: {0}")]
    JobRegistrationFailed(String),

    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let domain_err = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                BillSyncError::InvalidInput(err.to_string())
            }
            SchedulerError::JobRegistrationFailed(_) => BillSyncError::Config(err.to_string()),
            _ => BillSyncError::Internal(err.to_string()),
        };
        InfraError(domain_err)
    }
}

impl From<SchedulerError> for BillSyncError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Reasons a run could not be started.
#[derive(Debug, Error)]
pub enum JobError {
    /// Another run for the same account has not finished yet.
    #[error("a sync run for account {account} is already in progress ({run_id})")]
    AlreadyRunning { account: Account, run_id: RunId },

    #[error("job runner is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Sync(#[from] BillSyncError),
}

impl From<JobError> for BillSyncError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Sync(inner) => inner,
            JobError::AlreadyRunning { .. } => BillSyncError::InvalidInput(err.to_string()),
            JobError::ShuttingDown => BillSyncError::Cancelled(err.to_string()),
        }
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
