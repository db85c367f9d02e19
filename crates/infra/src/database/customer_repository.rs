//! SQLite-backed customer mirror.

use std::sync::Arc;

use async_trait::async_trait;
use billsync_core::{CustomerRepository, RemovalCounts, UpsertOutcome};
use billsync_domain::{Account, BillSyncError, Customer, CustomerAnnotations, CustomerUpsert, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use tracing::{debug, instrument};

use super::helpers::{
    account_column, bool_to_int, int_to_bool, i64_to_u64, map_join_error, map_sql_error,
};
use super::manager::DbManager;

const CUSTOMER_COLUMNS: &str = "id, account, external_id, name, tax_id, email, phone, \
     mobile_phone, postal_code, address, address_number, complement, province, city, state, \
     municipal_inscription, state_inscription, observations, external_reference, \
     notifications_disabled, remote_created_on, assigned_handler, service_completed, \
     synced_at, created_at";

/// Customer repository over the shared [`DbManager`].
pub struct SqliteCustomerRepository {
    db: Arc<DbManager>,
}

impl SqliteCustomerRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CustomerRepository for SqliteCustomerRepository {
    async fn find_local_id(&self, account: Account, external_id: &str) -> Result<Option<i64>> {
        let db = Arc::clone(&self.db);
        let external_id = external_id.to_string();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT id FROM customers WHERE account = ?1 AND external_id = ?2",
                params![account.as_str(), external_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    #[instrument(skip(self, customer), fields(account = %customer.account, customer = %customer.external_id))]
    async fn upsert(&self, customer: &CustomerUpsert) -> Result<UpsertOutcome> {
        let db = Arc::clone(&self.db);
        let customer = customer.clone();

        task::spawn_blocking(move || {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            let now = Utc::now();

            let existing = select_customer(&tx, customer.account, &customer.external_id)?;
            let outcome = match existing {
                None => {
                    insert_customer(&tx, &customer, now)?;
                    UpsertOutcome::Created
                }
                Some(stored) if stored.fields == customer => {
                    tx.execute(
                        "UPDATE customers SET synced_at = ?1 WHERE id = ?2",
                        params![now, stored.id],
                    )
                    .map_err(map_sql_error)?;
                    UpsertOutcome::Unchanged
                }
                Some(stored) => {
                    update_customer(&tx, stored.id, &customer, now)?;
                    UpsertOutcome::Updated
                }
            };

            tx.commit().map_err(map_sql_error)?;
            debug!(?outcome, "customer upserted");
            Ok(outcome)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_external_ids(&self, account: Account) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare("SELECT external_id FROM customers WHERE account = ?1 ORDER BY external_id")
                .map_err(map_sql_error)?;
            let ids = stmt
                .query_map(params![account.as_str()], |row| row.get(0))
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(map_sql_error)?;
            Ok(ids)
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
                    "SELECT COUNT(*) FROM customers WHERE account = ?1",
                    params![account.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(i64_to_u64(count))
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, account: Account, external_id: &str) -> Result<Option<Customer>> {
        let db = Arc::clone(&self.db);
        let external_id = external_id.to_string();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            select_customer(&conn, account, &external_id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, account: Account) -> Result<Vec<Customer>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE account = ?1 ORDER BY name, external_id"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let customers = stmt
                .query_map(params![account.as_str()], customer_from_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(customers)
        })
        .await
        .map_err(map_join_error)?
    }

    #[instrument(skip(self, annotations))]
    async fn annotate(
        &self,
        account: Account,
        external_id: &str,
        annotations: &CustomerAnnotations,
    ) -> Result<Customer> {
        let db = Arc::clone(&self.db);
        let external_id = external_id.to_string();
        let annotations = annotations.clone();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "UPDATE customers SET assigned_handler = ?1, service_completed = ?2 \
                     WHERE account = ?3 AND external_id = ?4",
                    params![
                        annotations.assigned_handler,
                        bool_to_int(annotations.service_completed),
                        account.as_str(),
                        external_id,
                    ],
                )
                .map_err(map_sql_error)?;

            if changed == 0 {
                return Err(BillSyncError::NotFound(format!(
                    "customer {external_id} in account {account}"
                )));
            }

            select_customer(&conn, account, &external_id)?.ok_or_else(|| {
                BillSyncError::NotFound(format!("customer {external_id} in account {account}"))
            })
        })
        .await
        .map_err(map_join_error)?
    }

    #[instrument(skip(self, external_ids), fields(requested = external_ids.len()))]
    async fn delete_with_charges(
        &self,
        account: Account,
        external_ids: &[String],
    ) -> Result<RemovalCounts> {
        if external_ids.is_empty() {
            return Ok(RemovalCounts::default());
        }

        let db = Arc::clone(&self.db);
        let external_ids = external_ids.to_vec();

        task::spawn_blocking(move || {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            let mut removed = RemovalCounts::default();

            {
                let mut delete_charges = tx
                    .prepare(
                        "DELETE FROM charges WHERE customer_id IN \
                         (SELECT id FROM customers WHERE account = ?1 AND external_id = ?2)",
                    )
                    .map_err(map_sql_error)?;
                let mut delete_customer = tx
                    .prepare("DELETE FROM customers WHERE account = ?1 AND external_id = ?2")
                    .map_err(map_sql_error)?;

                for external_id in &external_ids {
                    let charges = delete_charges
                        .execute(params![account.as_str(), external_id])
                        .map_err(map_sql_error)?;
                    let customers = delete_customer
                        .execute(params![account.as_str(), external_id])
                        .map_err(map_sql_error)?;
                    removed.charges += charges as u64;
                    removed.customers += customers as u64;
                }
            }

            tx.commit().map_err(map_sql_error)?;
            Ok(removed)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn select_customer(
    conn: &Connection,
    account: Account,
    external_id: &str,
) -> Result<Option<Customer>> {
    let sql =
        format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE account = ?1 AND external_id = ?2");
    conn.query_row(&sql, params![account.as_str(), external_id], customer_from_row)
        .optional()
        .map_err(map_sql_error)
}

fn insert_customer(
    conn: &Connection,
    customer: &CustomerUpsert,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO customers (account, external_id, name, tax_id, email, phone, mobile_phone, \
         postal_code, address, address_number, complement, province, city, state, \
         municipal_inscription, state_inscription, observations, external_reference, \
         notifications_disabled, remote_created_on, synced_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20, ?21, ?21)",
        params![
            customer.account.as_str(),
            customer.external_id,
            customer.name,
            customer.tax_id,
            customer.email,
            customer.phone,
            customer.mobile_phone,
            customer.postal_code,
            customer.address,
            customer.address_number,
            customer.complement,
            customer.province,
            customer.city,
            customer.state,
            customer.municipal_inscription,
            customer.state_inscription,
            customer.observations,
            customer.external_reference,
            bool_to_int(customer.notifications_disabled),
            customer.remote_created_on,
            now,
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

/// Overwrites remote-owned columns only; annotations stay untouched.
fn update_customer(
    conn: &Connection,
    id: i64,
    customer: &CustomerUpsert,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE customers SET name = ?1, tax_id = ?2, email = ?3, phone = ?4, mobile_phone = ?5, \
         postal_code = ?6, address = ?7, address_number = ?8, complement = ?9, province = ?10, \
         city = ?11, state = ?12, municipal_inscription = ?13, state_inscription = ?14, \
         observations = ?15, external_reference = ?16, notifications_disabled = ?17, \
         remote_created_on = ?18, synced_at = ?19 WHERE id = ?20",
        params![
            customer.name,
            customer.tax_id,
            customer.email,
            customer.phone,
            customer.mobile_phone,
            customer.postal_code,
            customer.address,
            customer.address_number,
            customer.complement,
            customer.province,
            customer.city,
            customer.state,
            customer.municipal_inscription,
            customer.state_inscription,
            customer.observations,
            customer.external_reference,
            bool_to_int(customer.notifications_disabled),
            customer.remote_created_on,
            now,
            id,
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        fields: CustomerUpsert {
            account: account_column(row, 1)?,
            external_id: row.get(2)?,
            name: row.get(3)?,
            tax_id: row.get(4)?,
            email: row.get(5)?,
            phone: row.get(6)?,
            mobile_phone: row.get(7)?,
            postal_code: row.get(8)?,
            address: row.get(9)?,
            address_number: row.get(10)?,
            complement: row.get(11)?,
            province: row.get(12)?,
            city: row.get(13)?,
            state: row.get(14)?,
            municipal_inscription: row.get(15)?,
            state_inscription: row.get(16)?,
            observations: row.get(17)?,
            external_reference: row.get(18)?,
            notifications_disabled: int_to_bool(row.get(19)?),
            remote_created_on: row.get(20)?,
        },
        annotations: CustomerAnnotations {
            assigned_handler: row.get(21)?,
            service_completed: int_to_bool(row.get(22)?),
        },
        synced_at: row.get(23)?,
        created_at: row.get(24)?,
    })
}

#[cfg(test)]
mod tests {
    use billsync_core::ChargeRepository;
    use billsync_domain::{BillingType, ChargeStatus, ChargeUpsert, Money};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;
    use crate::database::SqliteChargeRepository;

    fn setup() -> (TempDir, Arc<DbManager>) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(DbManager::new(temp_dir.path().join("customers.db"), 4).unwrap());
        db.run_migrations().unwrap();
        (temp_dir, db)
    }

    fn customer(account: Account, id: &str, name: &str) -> CustomerUpsert {
        CustomerUpsert {
            account,
            external_id: id.to_string(),
            name: name.to_string(),
            tax_id: Some("24971563792".into()),
            email: None,
            phone: None,
            mobile_phone: Some("11987654321".into()),
            postal_code: None,
            address: None,
            address_number: None,
            complement: None,
            province: None,
            city: Some("Campinas".into()),
            state: Some("SP".into()),
            municipal_inscription: None,
            state_inscription: None,
            observations: None,
            external_reference: None,
            notifications_disabled: false,
            remote_created_on: NaiveDate::from_ymd_opt(2024, 3, 11),
        }
    }

    fn charge(id: &str, customer: &str) -> ChargeUpsert {
        ChargeUpsert {
            account: Account::Primary,
            external_id: id.to_string(),
            customer_external_id: customer.to_string(),
            billing_type: BillingType::Boleto,
            status: ChargeStatus::Pending,
            amount: Money::from_cents(10_000),
            net_amount: None,
            description: None,
            due_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            payment_date: None,
            remote_created_on: None,
            invoice_url: None,
            bank_slip_url: None,
            pix_qr_code_url: None,
            pix_copy_paste: None,
            installment_number: None,
            installment_count: None,
            external_reference: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_reports_created_unchanged_updated() {
        let (_dir, db) = setup();
        let repo = SqliteCustomerRepository::new(db);
        let mut record = customer(Account::Primary, "cus_1", "Maria Souza");

        assert_eq!(repo.upsert(&record).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(repo.upsert(&record).await.unwrap(), UpsertOutcome::Unchanged);

        record.email = Some("maria@example.com".into());
        assert_eq!(repo.upsert(&record).await.unwrap(), UpsertOutcome::Updated);

        let stored = repo.get(Account::Primary, "cus_1").await.unwrap().expect("stored");
        assert_eq!(stored.fields, record);
        assert_eq!(repo.count(Account::Primary).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_external_id_is_distinct_per_account() {
        let (_dir, db) = setup();
        let repo = SqliteCustomerRepository::new(db);

        repo.upsert(&customer(Account::Primary, "cus_1", "Maria")).await.unwrap();
        repo.upsert(&customer(Account::Alternate, "cus_1", "João")).await.unwrap();

        let primary = repo.find_local_id(Account::Primary, "cus_1").await.unwrap();
        let alternate = repo.find_local_id(Account::Alternate, "cus_1").await.unwrap();
        assert!(primary.is_some() && alternate.is_some());
        assert_ne!(primary, alternate);
        assert_eq!(repo.list(Account::Alternate).await.unwrap()[0].fields.name, "João");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn annotations_survive_remote_updates() {
        let (_dir, db) = setup();
        let repo = SqliteCustomerRepository::new(db);
        let mut record = customer(Account::Primary, "cus_1", "Maria");
        repo.upsert(&record).await.unwrap();

        let annotations =
            CustomerAnnotations { assigned_handler: Some("ana".into()), service_completed: true };
        let annotated = repo.annotate(Account::Primary, "cus_1", &annotations).await.unwrap();
        assert_eq!(annotated.annotations, annotations);

        record.name = "Maria S. Souza".into();
        repo.upsert(&record).await.unwrap();

        let stored = repo.get(Account::Primary, "cus_1").await.unwrap().unwrap();
        assert_eq!(stored.fields.name, "Maria S. Souza");
        assert_eq!(stored.annotations, annotations);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn annotate_unknown_customer_is_not_found() {
        let (_dir, db) = setup();
        let repo = SqliteCustomerRepository::new(db);

        let err = repo
            .annotate(Account::Primary, "cus_missing", &CustomerAnnotations::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BillSyncError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_with_charges_removes_dependents_first() {
        let (_dir, db) = setup();
        let customers = SqliteCustomerRepository::new(Arc::clone(&db));
        let charges = SqliteChargeRepository::new(Arc::clone(&db));

        customers.upsert(&customer(Account::Primary, "cus_1", "Maria")).await.unwrap();
        customers.upsert(&customer(Account::Primary, "cus_2", "Pedro")).await.unwrap();
        let local = customers.find_local_id(Account::Primary, "cus_1").await.unwrap().unwrap();
        charges.upsert(local, &charge("pay_1", "cus_1")).await.unwrap();
        charges.upsert(local, &charge("pay_2", "cus_1")).await.unwrap();

        let removed = customers
            .delete_with_charges(Account::Primary, &["cus_1".to_string(), "cus_x".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, RemovalCounts { customers: 1, charges: 2 });
        assert_eq!(customers.list_external_ids(Account::Primary).await.unwrap(), vec!["cus_2"]);
        assert_eq!(charges.count(Account::Primary).await.unwrap(), 0);
    }
}
