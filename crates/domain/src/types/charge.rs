//! Charge (payment) records: the remote wire shape and the local row.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::account::Account;
use super::money::Money;
use super::{non_blank, trimmed_id, RemoteRecord};
use crate::errors::BillSyncError;

/// Payment instrument of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingType {
    Boleto,
    CreditCard,
    Pix,
    Undefined,
}

impl BillingType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boleto => "BOLETO",
            Self::CreditCard => "CREDIT_CARD",
            Self::Pix => "PIX",
            Self::Undefined => "UNDEFINED",
        }
    }
}

impl FromStr for BillingType {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOLETO" => Ok(Self::Boleto),
            "CREDIT_CARD" => Ok(Self::CreditCard),
            "PIX" => Ok(Self::Pix),
            "UNDEFINED" => Ok(Self::Undefined),
            other => Err(BillSyncError::InvalidInput(format!("unknown billing type: {other}"))),
        }
    }
}

/// Lifecycle status of a charge on the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Pending,
    Received,
    Confirmed,
    Overdue,
    Refunded,
    ReceivedInCash,
    RefundRequested,
    RefundInProgress,
    ChargebackRequested,
    ChargebackDispute,
    AwaitingChargebackReversal,
    DunningRequested,
    DunningReceived,
    AwaitingRiskAnalysis,
}

impl ChargeStatus {
    const VARIANTS: [Self; 14] = [
        Self::Pending,
        Self::Received,
        Self::Confirmed,
        Self::Overdue,
        Self::Refunded,
        Self::ReceivedInCash,
        Self::RefundRequested,
        Self::RefundInProgress,
        Self::ChargebackRequested,
        Self::ChargebackDispute,
        Self::AwaitingChargebackReversal,
        Self::DunningRequested,
        Self::DunningReceived,
        Self::AwaitingRiskAnalysis,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Received => "RECEIVED",
            Self::Confirmed => "CONFIRMED",
            Self::Overdue => "OVERDUE",
            Self::Refunded => "REFUNDED",
            Self::ReceivedInCash => "RECEIVED_IN_CASH",
            Self::RefundRequested => "REFUND_REQUESTED",
            Self::RefundInProgress => "REFUND_IN_PROGRESS",
            Self::ChargebackRequested => "CHARGEBACK_REQUESTED",
            Self::ChargebackDispute => "CHARGEBACK_DISPUTE",
            Self::AwaitingChargebackReversal => "AWAITING_CHARGEBACK_REVERSAL",
            Self::DunningRequested => "DUNNING_REQUESTED",
            Self::DunningReceived => "DUNNING_RECEIVED",
            Self::AwaitingRiskAnalysis => "AWAITING_RISK_ANALYSIS",
        }
    }

    /// Money has reached the merchant.
    pub const fn is_paid(self) -> bool {
        matches!(self, Self::Received | Self::Confirmed | Self::ReceivedInCash)
    }
}

impl FromStr for ChargeStatus {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::VARIANTS
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BillSyncError::InvalidInput(format!("unknown charge status: {s}")))
    }
}

/// Charge as listed by the remote platform.
///
/// Required: `id`, `customer`, `billingType`, `status`, `value`, `dueDate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCharge {
    #[serde(deserialize_with = "trimmed_id")]
    pub id: String,
    #[serde(deserialize_with = "trimmed_id")]
    pub customer: String,
    pub billing_type: BillingType,
    pub status: ChargeStatus,
    pub value: Money,
    #[serde(default)]
    pub net_value: Option<Money>,
    #[serde(default)]
    pub description: Option<String>,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub date_created: Option<NaiveDate>,
    #[serde(default)]
    pub invoice_url: Option<String>,
    #[serde(default)]
    pub bank_slip_url: Option<String>,
    #[serde(default)]
    pub pix_qr_code_url: Option<String>,
    #[serde(default)]
    pub pix_copy_and_paste: Option<String>,
    #[serde(default)]
    pub installment_number: Option<u32>,
    #[serde(default)]
    pub installment_count: Option<u32>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

impl RemoteRecord for RemoteCharge {
    fn external_id(&self) -> &str {
        self.id.trim()
    }
}

/// Fields of a charge row owned by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeUpsert {
    pub account: Account,
    pub external_id: String,
    pub customer_external_id: String,
    pub billing_type: BillingType,
    pub status: ChargeStatus,
    pub amount: Money,
    pub net_amount: Option<Money>,
    pub description: Option<String>,
    pub due_date: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    pub remote_created_on: Option<NaiveDate>,
    pub invoice_url: Option<String>,
    pub bank_slip_url: Option<String>,
    pub pix_qr_code_url: Option<String>,
    pub pix_copy_paste: Option<String>,
    pub installment_number: Option<u32>,
    pub installment_count: Option<u32>,
    pub external_reference: Option<String>,
}

impl ChargeUpsert {
    /// Map a remote record onto the local schema.
    pub fn from_remote(account: Account, remote: &RemoteCharge) -> Self {
        Self {
            account,
            external_id: remote.external_id().to_owned(),
            customer_external_id: remote.customer.trim().to_owned(),
            billing_type: remote.billing_type,
            status: remote.status,
            amount: remote.value,
            net_amount: remote.net_value,
            description: non_blank(remote.description.as_deref()),
            due_date: remote.due_date,
            payment_date: remote.payment_date,
            remote_created_on: remote.date_created,
            invoice_url: non_blank(remote.invoice_url.as_deref()),
            bank_slip_url: non_blank(remote.bank_slip_url.as_deref()),
            pix_qr_code_url: non_blank(remote.pix_qr_code_url.as_deref()),
            pix_copy_paste: non_blank(remote.pix_copy_and_paste.as_deref()),
            installment_number: remote.installment_number,
            installment_count: remote.installment_count,
            external_reference: non_blank(remote.external_reference.as_deref()),
        }
    }
}

/// Identifiers of a stored charge, used by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChargeKey {
    pub external_id: String,
    pub customer_external_id: String,
}

/// Charge row as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: i64,
    pub customer_id: i64,
    #[serde(flatten)]
    pub fields: ChargeUpsert,
    pub synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
