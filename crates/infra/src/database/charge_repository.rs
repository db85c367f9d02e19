//! SQLite-backed charge mirror.

use std::sync::Arc;

use async_trait::async_trait;
use billsync_core::{ChargeRepository, UpsertOutcome};
use billsync_domain::{Account, Charge, ChargeKey, ChargeUpsert, Money, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use tracing::{debug, instrument};

use super::helpers::{account_column, i64_to_u64, map_join_error, map_sql_error, parse_column};
use super::manager::DbManager;

const CHARGE_COLUMNS: &str = "id, account, external_id, customer_id, customer_external_id, \
     billing_type, status, amount_cents, net_amount_cents, description, due_date, payment_date, \
     remote_created_on, invoice_url, bank_slip_url, pix_qr_code_url, pix_copy_paste, \
     installment_number, installment_count, external_reference, synced_at, created_at";

pub struct SqliteChargeRepository {
    db: Arc<DbManager>,
}

impl SqliteChargeRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChargeRepository for SqliteChargeRepository {
    #[instrument(skip(self, charge), fields(account = %charge.account, charge = %charge.external_id))]
    async fn upsert(&self, customer_local_id: i64, charge: &ChargeUpsert) -> Result<UpsertOutcome> {
        let db = Arc::clone(&self.db);
        let charge = charge.clone();

        task::spawn_blocking(move || {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            let now = Utc::now();

            let outcome = match select_charge(&tx, charge.account, &charge.external_id)? {
                None => {
                    insert_charge(&tx, customer_local_id, &charge, now)?;
                    UpsertOutcome::Created
                }
                Some(stored) if stored.fields == charge && stored.customer_id == customer_local_id => {
                    tx.execute(
                        "UPDATE charges SET synced_at = ?1 WHERE id = ?2",
                        params![now, stored.id],
                    )
                    .map_err(map_sql_error)?;
                    UpsertOutcome::Unchanged
                }
                Some(stored) => {
                    update_charge(&tx, stored.id, customer_local_id, &charge, now)?;
                    UpsertOutcome::Updated
                }
            };

            tx.commit().map_err(map_sql_error)?;
            debug!(?outcome, "charge upserted");
            Ok(outcome)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_keys(&self, account: Account) -> Result<Vec<ChargeKey>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT external_id, customer_external_id FROM charges \
                     WHERE account = ?1 ORDER BY external_id",
                )
                .map_err(map_sql_error)?;
            let keys = stmt
                .query_map(params![account.as_str()], |row| {
                    Ok(ChargeKey { external_id: row.get(0)?, customer_external_id: row.get(1)? })
                })
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(keys)
        })
        .await
        .map_err(map_join_error)?
    }

    #[instrument(skip(self, external_ids), fields(requested = external_ids.len()))]
    async fn delete(&self, account: Account, external_ids: &[String]) -> Result<u64> {
        if external_ids.is_empty() {
            return Ok(0);
        }

        let db = Arc::clone(&self.db);
        let external_ids = external_ids.to_vec();

        task::spawn_blocking(move || {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            let mut removed = 0_u64;

            {
                let mut stmt = tx
                    .prepare("DELETE FROM charges WHERE account = ?1 AND external_id = ?2")
                    .map_err(map_sql_error)?;
                for external_id in &external_ids {
                    removed +=
                        stmt.execute(params![account.as_str(), external_id]).map_err(map_sql_error)?
                            as u64;
                }
            }

            tx.commit().map_err(map_sql_error)?;
            Ok(removed)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count(&self, account: Account) -> Result<u64> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM charges WHERE account = ?1",
                    params![account.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(i64_to_u64(count))
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_for_customer(
        &self,
        account: Account,
        customer_external_id: &str,
    ) -> Result<Vec<Charge>> {
        let db = Arc::clone(&self.db);
        let customer_external_id = customer_external_id.to_string();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {CHARGE_COLUMNS} FROM charges \
                 WHERE account = ?1 AND customer_external_id = ?2 \
                 ORDER BY due_date, external_id"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let charges = stmt
                .query_map(params![account.as_str(), customer_external_id], charge_from_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(charges)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn select_charge(conn: &Connection, account: Account, external_id: &str) -> Result<Option<Charge>> {
    let sql = format!("SELECT {CHARGE_COLUMNS} FROM charges WHERE account = ?1 AND external_id = ?2");
    conn.query_row(&sql, params![account.as_str(), external_id], charge_from_row)
        .optional()
        .map_err(map_sql_error)
}

fn insert_charge(
    conn: &Connection,
    customer_id: i64,
    charge: &ChargeUpsert,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO charges (account, external_id, customer_id, customer_external_id, \
         billing_type, status, amount_cents, net_amount_cents, description, due_date, \
         payment_date, remote_created_on, invoice_url, bank_slip_url, pix_qr_code_url, \
         pix_copy_paste, installment_number, installment_count, external_reference, \
         synced_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20, ?20)",
        params![
            charge.account.as_str(),
            charge.external_id,
            customer_id,
            charge.customer_external_id,
            charge.billing_type.as_str(),
            charge.status.as_str(),
            charge.amount.cents(),
            charge.net_amount.map(Money::cents),
            charge.description,
            charge.due_date,
            charge.payment_date,
            charge.remote_created_on,
            charge.invoice_url,
            charge.bank_slip_url,
            charge.pix_qr_code_url,
            charge.pix_copy_paste,
            charge.installment_number,
            charge.installment_count,
            charge.external_reference,
            now,
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

fn update_charge(
    conn: &Connection,
    id: i64,
    customer_id: i64,
    charge: &ChargeUpsert,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE charges SET customer_id = ?1, customer_external_id = ?2, billing_type = ?3, \
         status = ?4, amount_cents = ?5, net_amount_cents = ?6, description = ?7, due_date = ?8, \
         payment_date = ?9, remote_created_on = ?10, invoice_url = ?11, bank_slip_url = ?12, \
         pix_qr_code_url = ?13, pix_copy_paste = ?14, installment_number = ?15, \
         installment_count = ?16, external_reference = ?17, synced_at = ?18 WHERE id = ?19",
        params![
            customer_id,
            charge.customer_external_id,
            charge.billing_type.as_str(),
            charge.status.as_str(),
            charge.amount.cents(),
            charge.net_amount.map(Money::cents),
            charge.description,
            charge.due_date,
            charge.payment_date,
            charge.remote_created_on,
            charge.invoice_url,
            charge.bank_slip_url,
            charge.pix_qr_code_url,
            charge.pix_copy_paste,
            charge.installment_number,
            charge.installment_count,
            charge.external_reference,
            now,
            id,
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

fn charge_from_row(row: &Row<'_>) -> rusqlite::Result<Charge> {
    Ok(Charge {
        id: row.get(0)?,
        customer_id: row.get(3)?,
        fields: ChargeUpsert {
            account: account_column(row, 1)?,
            external_id: row.get(2)?,
            customer_external_id: row.get(4)?,
            billing_type: parse_column(row, 5)?,
            status: parse_column(row, 6)?,
            amount: Money::from_cents(row.get(7)?),
            net_amount: row.get::<_, Option<i64>>(8)?.map(Money::from_cents),
            description: row.get(9)?,
            due_date: row.get(10)?,
            payment_date: row.get(11)?,
            remote_created_on: row.get(12)?,
            invoice_url: row.get(13)?,
            bank_slip_url: row.get(14)?,
            pix_qr_code_url: row.get(15)?,
            pix_copy_paste: row.get(16)?,
            installment_number: row.get(17)?,
            installment_count: row.get(18)?,
            external_reference: row.get(19)?,
        },
        synced_at: row.get(20)?,
        created_at: row.get(21)?,
    })
}
