//! Paging primitives for remote listings.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAGE_SIZE;

/// Offset/limit window for one listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    /// First page with the given size, clamped to what the remote accepts.
    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit: limit.clamp(1, MAX_PAGE_SIZE) }
    }

    pub fn next(self) -> Self {
        Self { offset: self.offset.saturating_add(u64::from(self.limit)), limit: self.limit }
    }
}

/// A record from a page that could not be decoded.
///
/// When the id is known the record still counts as present remotely, so
/// reconciliation never deletes its local copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub external_id: Option<String>,
    pub reason: String,
}

/// One page of a remote listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
    pub has_more: bool,
    pub total_count: u64,
}

impl<T> Page<T> {
    /// Number of entries the server returned on this page.
    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_is_clamped() {
        assert_eq!(PageRequest::first(500).limit, MAX_PAGE_SIZE);
        assert_eq!(PageRequest::first(0).limit, 1);
    }

    #[test]
    fn next_advances_by_limit() {
        let page = PageRequest::first(100).next().next();
        assert_eq!(page.offset, 200);
        assert_eq!(page.limit, 100);
    }
}
