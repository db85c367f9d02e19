//! Domain types and models

pub mod account;
pub mod charge;
pub mod customer;
pub mod money;
pub mod page;
pub mod sync_run;

pub use account::Account;
pub use charge::{BillingType, Charge, ChargeKey, ChargeStatus, ChargeUpsert, RemoteCharge};
pub use customer::{Customer, CustomerAnnotations, CustomerUpsert, RemoteCustomer};
pub use money::Money;
pub use page::{Page, PageRequest, RejectedRecord};
pub use sync_run::{
    EntityCounts, NewSyncRun, RunCompletion, RunId, RunKind, RunStatus, SyncPhase, SyncRequest,
    SyncRun, ValidationReport,
};

/// A record listed by the remote platform, keyed by its external id.
pub trait RemoteRecord {
    /// The id every listing, upsert and reconciliation keys on; trimmed.
    fn external_id(&self) -> &str;
}

/// Deserialize a remote identifier, trimmed; blank ids fail to decode.
pub(crate) fn trimmed_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
    let id = raw.trim();
    if id.is_empty() {
        return Err(serde::de::Error::custom("blank identifier"));
    }
    Ok(id.to_owned())
}

/// Trimmed copy of `value`, or `None` when it is missing or blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}
