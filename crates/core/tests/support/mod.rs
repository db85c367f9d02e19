//! Shared test helpers for `billsync-core` integration tests.
//!
//! In-memory fakes for every port plus builders for remote records, so the
//! engine tests can focus on behaviour instead of boilerplate.

#![allow(dead_code)]

pub mod remote;
pub mod repositories;

use std::sync::Arc;
use std::time::Duration;

use billsync_core::{FetchSettings, SyncOrchestrator, SyncSettings};
use billsync_domain::{
    BillingType, ChargeStatus, Money, RemoteCharge, RemoteCustomer,
};
use chrono::NaiveDate;

pub use remote::FakeRemote;
pub use repositories::{MemoryRunLog, MemoryStore};

/// Settings with no page delays so tests run instantly.
pub fn fast_settings(page_size: u32) -> SyncSettings {
    SyncSettings {
        fetch: FetchSettings {
            page_size,
            customer_page_delay: Duration::ZERO,
            charge_page_delay: Duration::ZERO,
        },
        charge_concurrency: 3,
    }
}

/// Orchestrator wired to fresh in-memory stores.
pub fn orchestrator(page_size: u32) -> (SyncOrchestrator, Arc<MemoryStore>, Arc<MemoryRunLog>) {
    let store = Arc::new(MemoryStore::default());
    let runs = Arc::new(MemoryRunLog::default());
    let orchestrator = SyncOrchestrator::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&runs) as _,
        fast_settings(page_size),
    );
    (orchestrator, store, runs)
}

pub fn customer(id: &str, name: &str) -> RemoteCustomer {
    RemoteCustomer {
        id: id.to_string(),
        name: name.to_string(),
        cpf_cnpj: Some("24971563792".to_string()),
        email: Some(format!("{id}@example.com")),
        phone: None,
        mobile_phone: None,
        postal_code: None,
        address: None,
        address_number: None,
        complement: None,
        province: None,
        city: Some("São Paulo".to_string()),
        state: Some("SP".to_string()),
        municipal_inscription: None,
        state_inscription: None,
        observations: None,
        external_reference: None,
        notification_disabled: None,
        date_created: NaiveDate::from_ymd_opt(2024, 1, 15),
    }
}

pub fn charge(id: &str, customer: &str) -> RemoteCharge {
    RemoteCharge {
        id: id.to_string(),
        customer: customer.to_string(),
        billing_type: BillingType::Pix,
        status: ChargeStatus::Pending,
        value: Money::from_cents(15_000),
        net_value: Some(Money::from_cents(14_801)),
        description: Some("Monthly fee".to_string()),
        due_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap_or_default(),
        payment_date: None,
        date_created: NaiveDate::from_ymd_opt(2024, 5, 2),
        invoice_url: None,
        bank_slip_url: None,
        pix_qr_code_url: None,
        pix_copy_and_paste: None,
        installment_number: None,
        installment_count: None,
        external_reference: None,
    }
}

/// `count` customers named `cus_0..cus_{count-1}`.
pub fn customers(count: usize) -> Vec<RemoteCustomer> {
    (0..count).map(|i| customer(&format!("cus_{i}"), &format!("Customer {i}"))).collect()
}
