//! Run log types: one row per synchronization execution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::Account;
use crate::errors::BillSyncError;

/// Identifier of a sync run, doubling as the job handle returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Time-ordered identifier for a new run.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| BillSyncError::InvalidInput(format!("invalid run id '{s}': {e}")))
    }
}

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Download customers and their charges, upsert both, optionally
    /// reconcile.
    Full,
    /// Download charges for the customers already stored locally and upsert
    /// them. Never reconciles.
    MissingCharges,
}

impl RunKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MissingCharges => "missing_charges",
        }
    }
}

impl FromStr for RunKind {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "missing_charges" => Ok(Self::MissingCharges),
            other => Err(BillSyncError::InvalidInput(format!("unknown run kind: {other}"))),
        }
    }
}

/// Final (or current) status of a run. Derived, never chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Error => "ERROR",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl FromStr for RunStatus {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "PARTIAL" => Ok(Self::Partial),
            "ERROR" => Ok(Self::Error),
            other => Err(BillSyncError::InvalidInput(format!("unknown run status: {other}"))),
        }
    }
}

/// States of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Init,
    DownloadCustomers,
    DownloadCharges,
    PersistCustomers,
    PersistCharges,
    Reconcile,
    Done,
    Failed,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::DownloadCustomers => "DOWNLOAD_CUSTOMERS",
            Self::DownloadCharges => "DOWNLOAD_CHARGES",
            Self::PersistCustomers => "PERSIST_CUSTOMERS",
            Self::PersistCharges => "PERSIST_CHARGES",
            Self::Reconcile => "RECONCILE",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPhase {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Init,
            Self::DownloadCustomers,
            Self::DownloadCharges,
            Self::PersistCustomers,
            Self::PersistCharges,
            Self::Reconcile,
            Self::Done,
            Self::Failed,
        ]
        .into_iter()
        .find(|phase| phase.as_str() == s)
        .ok_or_else(|| BillSyncError::InvalidInput(format!("unknown sync phase: {s}")))
    }
}

/// Per-entity tallies for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    /// Records received from the remote listing (unique ids).
    pub seen: u64,
    pub created: u64,
    /// Records whose stored fields changed.
    pub updated: u64,
    /// Records re-applied without any change.
    pub unchanged: u64,
    /// Charges dropped because their customer is not stored locally.
    pub orphaned: u64,
    pub removed: u64,
    /// Per-record and per-unit failures.
    pub errors: u64,
}

impl EntityCounts {
    /// Records written (created or changed).
    pub const fn written(&self) -> u64 {
        self.created.saturating_add(self.updated)
    }
}

/// Input for opening a run log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSyncRun {
    pub id: RunId,
    pub kind: RunKind,
    pub account: Account,
    pub triggered_by: String,
    pub reconcile_requested: bool,
    pub started_at: DateTime<Utc>,
}

/// End-of-run fields written exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub phase: SyncPhase,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub customers: EntityCounts,
    pub charges: EntityCounts,
    pub summary: String,
    pub error_detail: Option<String>,
}

/// A run log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub kind: RunKind,
    pub account: Account,
    pub status: RunStatus,
    pub phase: SyncPhase,
    pub triggered_by: String,
    pub reconcile_requested: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub customers: EntityCounts,
    pub charges: EntityCounts,
    pub summary: Option<String>,
    pub error_detail: Option<String>,
}

/// What a caller asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub account: Account,
    pub kind: RunKind,
    /// Enables the destructive reconciliation phase (full runs only).
    pub reconcile: bool,
    pub triggered_by: String,
}

impl SyncRequest {
    pub fn full(account: Account, reconcile: bool, triggered_by: impl Into<String>) -> Self {
        Self { account, kind: RunKind::Full, reconcile, triggered_by: triggered_by.into() }
    }

    pub fn missing_charges(account: Account, triggered_by: impl Into<String>) -> Self {
        Self {
            account,
            kind: RunKind::MissingCharges,
            reconcile: false,
            triggered_by: triggered_by.into(),
        }
    }
}

/// Local counts compared with the totals the remote platform reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub account: Account,
    pub local_customers: u64,
    pub remote_customers: u64,
    pub local_charges: u64,
    pub remote_charges: u64,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    pub const fn customers_match(&self) -> bool {
        self.local_customers == self.remote_customers
    }

    pub const fn charges_match(&self) -> bool {
        self.local_charges == self.remote_charges
    }

    pub const fn is_consistent(&self) -> bool {
        self.customers_match() && self.charges_match()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_parses_its_display_form() {
        let id = RunId::new();
        assert_eq!(id.to_string().parse::<RunId>().unwrap(), id);
        assert_eq!(id.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn rejects_malformed_run_id() {
        assert!(matches!("nope".parse::<RunId>(), Err(BillSyncError::InvalidInput(_))));
    }

    #[test]
    fn status_and_phase_parse_their_labels() {
        for status in
            [RunStatus::InProgress, RunStatus::Success, RunStatus::Partial, RunStatus::Error]
        {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert_eq!("RECONCILE".parse::<SyncPhase>().unwrap(), SyncPhase::Reconcile);
        assert!(!RunStatus::InProgress.is_terminal());
    }

    #[test]
    fn validation_report_flags_mismatch() {
        let report = ValidationReport {
            account: Account::Primary,
            local_customers: 10,
            remote_customers: 10,
            local_charges: 41,
            remote_charges: 42,
            checked_at: Utc::now(),
        };
        assert!(report.customers_match());
        assert!(!report.is_consistent());
    }
}
