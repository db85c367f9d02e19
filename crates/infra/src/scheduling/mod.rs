//! Background execution of sync runs.
//!
//! - [`SyncJobRunner`]: bounded executor every run goes through
//! - [`SyncScheduler`]: cron-based trigger that submits runs to the runner

pub mod error;
pub mod job_runner;
pub mod sync_scheduler;

pub use error::{JobError, SchedulerError, SchedulerResult};
pub use job_runner::{SourceFactory, SyncJobRunner};
pub use sync_scheduler::{SyncScheduler, SyncSchedulerConfig};
