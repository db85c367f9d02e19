//! Asaas REST client for customer and charge listings

use async_trait::async_trait;
use billsync_core::RemoteSource;
use billsync_domain::constants::{ACCESS_TOKEN_HEADER, CHARGES_ENDPOINT, CUSTOMERS_ENDPOINT};
use billsync_domain::{
    Account, BillSyncError, Config, Page, PageRequest, RemoteCharge, RemoteCustomer, Result,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::types::ListEnvelope;
use crate::http::HttpClient;

/// Client for one Asaas account.
///
/// Built per run from configuration; it owns its executor and therefore its
/// throttle, so nothing is shared between runs or accounts.
#[derive(Clone)]
pub struct AsaasClient {
    http: HttpClient,
    account: Account,
}

impl AsaasClient {
    pub const fn new(http: HttpClient, account: Account) -> Self {
        Self { http, account }
    }

    /// Client for `account` using its configured token and executor settings.
    ///
    /// # Errors
    /// `Config` when the account has no credentials or the settings are
    /// invalid.
    pub fn from_config(config: &Config, account: Account) -> Result<Self> {
        let credentials = config.credentials(account)?;

        let mut token = HeaderValue::from_str(credentials.api_token.trim()).map_err(|_| {
            BillSyncError::Config(format!("api token for '{account}' is not a valid header value"))
        })?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(ACCESS_TOKEN_HEADER), token);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = HttpClient::from_config(&config.remote)?.default_headers(headers).build()?;
        Ok(Self::new(http, account))
    }

    pub const fn account(&self) -> Account {
        self.account
    }

    async fn list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Page<T>> {
        // Garbled pages are retried; once the budget is spent the listing
        // ends incomplete.
        let envelope: ListEnvelope = self.http.execute_json(Method::GET, endpoint, params).await?;
        let page = envelope.into_page::<T>();

        debug!(
            account = %self.account,
            endpoint,
            records = page.records.len(),
            rejected = page.rejected.len(),
            has_more = page.has_more,
            total = page.total_count,
            "listing page decoded"
        );
        Ok(page)
    }
}

fn paging(page: PageRequest) -> Vec<(&'static str, String)> {
    vec![("offset", page.offset.to_string()), ("limit", page.limit.to_string())]
}

#[async_trait]
impl RemoteSource for AsaasClient {
    #[instrument(skip(self), fields(account = %self.account))]
    async fn list_customers(&self, page: PageRequest) -> Result<Page<RemoteCustomer>> {
        self.list(CUSTOMERS_ENDPOINT, &paging(page)).await
    }

    #[instrument(skip(self), fields(account = %self.account))]
    async fn list_charges(
        &self,
        customer_external_id: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<RemoteCharge>> {
        let mut params = paging(page);
        if let Some(customer) = customer_external_id {
            params.push(("customer", customer.to_string()));
        }
        self.list(CHARGES_ENDPOINT, &params).await
    }
}
