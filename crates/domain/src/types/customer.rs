//! Customer records: the remote wire shape and the local row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::account::Account;
use super::{non_blank, trimmed_id, RemoteRecord};

/// Customer as listed by the remote platform.
///
/// `id` and `name` are required; a record missing either fails to decode and
/// is reported as rejected instead of being stored with made-up values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCustomer {
    #[serde(deserialize_with = "trimmed_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cpf_cnpj: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub address_number: Option<String>,
    #[serde(default)]
    pub complement: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub municipal_inscription: Option<String>,
    #[serde(default)]
    pub state_inscription: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub notification_disabled: Option<bool>,
    #[serde(default)]
    pub date_created: Option<NaiveDate>,
}

impl RemoteRecord for RemoteCustomer {
    fn external_id(&self) -> &str {
        self.id.trim()
    }
}

/// Fields of a customer row owned by the remote platform.
///
/// This is what an upsert writes; comparing two values tells whether a
/// re-synced record actually changed anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerUpsert {
    pub account: Account,
    pub external_id: String,
    pub name: String,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub address_number: Option<String>,
    pub complement: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub municipal_inscription: Option<String>,
    pub state_inscription: Option<String>,
    pub observations: Option<String>,
    pub external_reference: Option<String>,
    pub notifications_disabled: bool,
    pub remote_created_on: Option<NaiveDate>,
}

impl CustomerUpsert {
    /// Map a remote record onto the local schema.
    ///
    /// Blank strings become `None`, a missing notification flag means
    /// notifications are enabled.
    pub fn from_remote(account: Account, remote: &RemoteCustomer) -> Self {
        Self {
            account,
            external_id: remote.external_id().to_owned(),
            name: remote.name.trim().to_string(),
            tax_id: non_blank(remote.cpf_cnpj.as_deref()),
            email: non_blank(remote.email.as_deref()),
            phone: non_blank(remote.phone.as_deref()),
            mobile_phone: non_blank(remote.mobile_phone.as_deref()),
            postal_code: non_blank(remote.postal_code.as_deref()),
            address: non_blank(remote.address.as_deref()),
            address_number: non_blank(remote.address_number.as_deref()),
            complement: non_blank(remote.complement.as_deref()),
            province: non_blank(remote.province.as_deref()),
            city: non_blank(remote.city.as_deref()),
            state: non_blank(remote.state.as_deref()),
            municipal_inscription: non_blank(remote.municipal_inscription.as_deref()),
            state_inscription: non_blank(remote.state_inscription.as_deref()),
            observations: non_blank(remote.observations.as_deref()),
            external_reference: non_blank(remote.external_reference.as_deref()),
            notifications_disabled: remote.notification_disabled.unwrap_or(false),
            remote_created_on: remote.date_created,
        }
    }
}

/// Annotations kept only locally; the remote platform never sees them and
/// upserts never overwrite them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAnnotations {
    pub assigned_handler: Option<String>,
    pub service_completed: bool,
}

/// Customer row as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    #[serde(flatten)]
    pub fields: CustomerUpsert,
    #[serde(flatten)]
    pub annotations: CustomerAnnotations,
    pub synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_json() -> serde_json::Value {
        serde_json::json!({
            "object": "customer",
            "id": "cus_000005219613",
            "dateCreated": "2024-03-11",
            "name": "Maria Souza",
            "email": "maria@example.com",
            "phone": "",
            "mobilePhone": "11987654321",
            "cpfCnpj": "24971563792",
            "postalCode": "01310-000",
            "address": "Av. Paulista",
            "addressNumber": "1000",
            "complement": null,
            "province": "Bela Vista",
            "city": null,
            "state": "SP",
            "externalReference": "crm-42",
            "notificationDisabled": true,
            "deleted": false
        })
    }

    #[test]
    fn decodes_remote_shape_and_ignores_unknown_fields() {
        let remote: RemoteCustomer = serde_json::from_value(remote_json()).unwrap();
        assert_eq!(remote.id, "cus_000005219613");
        assert_eq!(remote.date_created, NaiveDate::from_ymd_opt(2024, 3, 11));
        assert_eq!(remote.notification_disabled, Some(true));
        assert!(remote.municipal_inscription.is_none());
    }

    #[test]
    fn missing_name_fails_closed() {
        let mut json = remote_json();
        json.as_object_mut().unwrap().remove("name");
        assert!(serde_json::from_value::<RemoteCustomer>(json).is_err());
    }

    #[test]
    fn padded_id_is_trimmed_and_blank_id_rejected() {
        let mut json = remote_json();
        json["id"] = serde_json::json!("  cus_000005219613 ");
        let remote: RemoteCustomer = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(remote.external_id(), "cus_000005219613");
        assert_eq!(
            CustomerUpsert::from_remote(Account::Primary, &remote).external_id,
            remote.external_id()
        );

        json["id"] = serde_json::json!("   ");
        assert!(serde_json::from_value::<RemoteCustomer>(json).is_err());
    }

    #[test]
    fn mapping_applies_explicit_defaults() {
        let mut json = remote_json();
        json.as_object_mut().unwrap().remove("notificationDisabled");
        let remote: RemoteCustomer = serde_json::from_value(json).unwrap();

        let upsert = CustomerUpsert::from_remote(Account::Primary, &remote);
        assert_eq!(upsert.account, Account::Primary);
        assert_eq!(upsert.tax_id.as_deref(), Some("24971563792"));
        assert!(upsert.phone.is_none(), "blank phone should map to None");
        assert!(!upsert.notifications_disabled);
    }
}
