//! Wire envelope of Asaas list endpoints.

use billsync_domain::{Page, RejectedRecord};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// `{ "data": [...], "hasMore": bool, "totalCount": n, ... }`
///
/// Records stay raw until [`ListEnvelope::into_page`] so one malformed entry
/// cannot fail the whole page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEnvelope {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    pub total_count: u64,
}

impl ListEnvelope {
    /// Decode each entry, collecting the ones that fail as rejected records.
    pub fn into_page<T: DeserializeOwned>(self) -> Page<T> {
        let mut records = Vec::with_capacity(self.data.len());
        let mut rejected = Vec::new();

        for raw in self.data {
            let external_id = raw
                .get("id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_owned);
            match serde_json::from_value::<T>(raw) {
                Ok(record) => records.push(record),
                Err(err) => rejected.push(RejectedRecord { external_id, reason: err.to_string() }),
            }
        }

        Page { records, rejected, has_more: self.has_more, total_count: self.total_count }
    }
}
