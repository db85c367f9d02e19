//! Paginated download of remote listings
//!
//! Walks offset/limit pages until the reported total is reached, an empty
//! page comes back, or the remote says there is nothing more. The resulting
//! [`Listing`] records whether it can be trusted as the complete remote set;
//! only complete listings may drive reconciliation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use billsync_domain::{
    BillSyncError, Page, PageRequest, RejectedRecord, RemoteCharge, RemoteCustomer, RemoteRecord,
    Result,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::ports::RemoteSource;
use super::reconciler::RemoteIdSet;

/// Paging knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub page_size: u32,
    pub customer_page_delay: Duration,
    pub charge_page_delay: Duration,
}

/// Everything one paginated download produced.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    /// Decoded records, unique by external id, in page order.
    pub records: Vec<T>,
    /// Ids seen remotely, decoded or not.
    pub ids_seen: HashSet<String>,
    /// `totalCount` from the first page.
    pub reported_total: Option<u64>,
    pub complete: bool,
    /// Transient error that stopped the walk early.
    pub failure: Option<BillSyncError>,
    pub rejected: Vec<RejectedRecord>,
    pub duplicates: u64,
}

impl<T> Listing<T> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            ids_seen: HashSet::new(),
            reported_total: None,
            complete: false,
            failure: None,
            rejected: Vec::new(),
            duplicates: 0,
        }
    }

    /// Unique ids accumulated across pages.
    pub fn unique_count(&self) -> u64 {
        self.ids_seen.len() as u64
    }

    /// The ids seen remotely, tagged with this listing's completeness.
    pub fn remote_ids(&self) -> RemoteIdSet {
        RemoteIdSet::new(self.ids_seen.clone(), self.complete)
    }

    /// Why the listing is not complete, `None` when it is.
    pub fn incompleteness(&self) -> Option<String> {
        if self.complete {
            return None;
        }
        if let Some(err) = &self.failure {
            return Some(format!("download stopped early: {err}"));
        }
        let without_id = self.rejected.iter().filter(|r| r.external_id.is_none()).count();
        if without_id > 0 {
            return Some(format!("{without_id} rejected record(s) without an id"));
        }
        Some(match self.reported_total {
            Some(total) => format!("accumulated {} of reported {total}", self.unique_count()),
            None => "no page was received".to_string(),
        })
    }

    fn absorb(&mut self, page: Page<T>)
    where
        T: RemoteRecord,
    {
        for record in page.records {
            if self.ids_seen.insert(record.external_id().to_owned()) {
                self.records.push(record);
            } else {
                self.duplicates += 1;
            }
        }
        for rejected in page.rejected {
            if let Some(id) = &rejected.external_id {
                if !self.ids_seen.insert(id.clone()) {
                    self.duplicates += 1;
                    continue;
                }
            }
            self.rejected.push(rejected);
        }
    }

    fn settle(&mut self) {
        self.complete = self.failure.is_none()
            && self.reported_total == Some(self.unique_count())
            && self.rejected.iter().all(|r| r.external_id.is_some());
    }
}

/// Downloads complete remote listings for one run.
pub struct PaginatedFetcher {
    source: Arc<dyn RemoteSource>,
    settings: FetchSettings,
    cancel: CancellationToken,
}

impl PaginatedFetcher {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        settings: FetchSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self { source, settings, cancel }
    }

    /// Download every customer of the account
    ///
    /// # Errors
    /// Phase-aborting errors (auth, remote rejection, cancellation).
    /// Transient page failures are reported inside the listing instead.
    pub async fn fetch_customers(&self) -> Result<Listing<RemoteCustomer>> {
        let source = Arc::clone(&self.source);
        self.fetch_all("customers", self.settings.customer_page_delay, move |page| {
            let source = Arc::clone(&source);
            async move { source.list_customers(page).await }
        })
        .await
    }

    /// Download every charge of one customer
    ///
    /// # Errors
    /// Same as [`Self::fetch_customers`].
    pub async fn fetch_charges(&self, customer_external_id: &str) -> Result<Listing<RemoteCharge>> {
        let source = Arc::clone(&self.source);
        let customer = customer_external_id.to_owned();
        self.fetch_all("charges", self.settings.charge_page_delay, move |page| {
            let source = Arc::clone(&source);
            let customer = customer.clone();
            async move { source.list_charges(Some(&customer), page).await }
        })
        .await
    }

    /// Walk every page of one listing.
    ///
    /// # Errors
    /// Returns the first phase-aborting error; other failures end the walk
    /// and leave the listing incomplete.
    #[instrument(skip(self, page_fn))]
    pub async fn fetch_all<T, F, Fut>(
        &self,
        resource: &str,
        page_delay: Duration,
        mut page_fn: F,
    ) -> Result<Listing<T>>
    where
        T: RemoteRecord,
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let mut listing = Listing::new();
        let mut request = PageRequest::first(self.settings.page_size);

        loop {
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(BillSyncError::Cancelled(format!("{resource} download cancelled")));
                }
                outcome = page_fn(request) => outcome,
            };

            let page = match outcome {
                Ok(page) => page,
                Err(err) if err.aborts_phase() => return Err(err),
                Err(err) => {
                    warn!(
                        resource,
                        offset = request.offset,
                        error = %err,
                        "page request failed, listing is incomplete"
                    );
                    listing.failure = Some(err);
                    break;
                }
            };

            if listing.reported_total.is_none() {
                listing.reported_total = Some(page.total_count);
            }
            let has_more = page.has_more;
            let returned = page.len();
            listing.absorb(page);

            debug!(
                resource,
                offset = request.offset,
                returned,
                accumulated = listing.unique_count(),
                has_more,
                "page received"
            );

            let reached_total =
                listing.reported_total.is_some_and(|total| listing.unique_count() >= total);
            if returned == 0 || !has_more || reached_total {
                break;
            }

            request = request.next();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(BillSyncError::Cancelled(format!("{resource} download cancelled")));
                }
                () = tokio::time::sleep(page_delay) => {}
            }
        }

        listing.settle();
        if let Some(reason) = listing.incompleteness() {
            warn!(resource, reason = %reason, "listing failed completeness validation");
        }
        Ok(listing)
    }
}
