//! API handlers.

use serde::{Deserialize, Serialize};

pub mod admin;
pub mod checkout;
pub mod codes;
pub mod credits;
pub mod health;
pub mod internal;
pub mod jobs;
pub mod uploads;
pub mod webhooks;

/// Largest page a listing returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Page-based listing parameters (`page` starts at 1).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    /// Page number (default: 1).
    #[serde(default = "default_page")]
    pub page: usize,
    /// Items per page (default: 20, at most 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PageQuery {
    /// Clamped page size.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Offset of the first item on this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit())
    }
}

/// One page of a listing.
#[derive(Debug, Serialize)]
pub struct Paged<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matches.
    pub total: u64,
    /// Page number.
    pub page: usize,
    /// Items per page.
    pub page_size: usize,
    /// Number of pages.
    pub total_pages: u64,
}

impl<T> Paged<T> {
    /// Wrap `items` for `query`, given the total number of matches.
    pub fn new(items: Vec<T>, total: u64, query: &PageQuery) -> Self {
        let page_size = query.limit();
        Self {
            items,
            total,
            page: query.page.max(1),
            page_size,
            total_pages: total.div_ceil(page_size as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_math() {
        let q = PageQuery {
            page: 3,
            page_size: 20,
        };
        assert_eq!(q.offset(), 40);

        let q = PageQuery {
            page: 0,
            page_size: 1000,
        };
        assert_eq!(q.limit(), MAX_PAGE_SIZE);
        assert_eq!(q.offset(), 0);

        let paged = Paged::new(vec![1, 2], 41, &PageQuery::default());
        assert_eq!(paged.total_pages, 3);
        assert_eq!(Paged::<u8>::new(vec![], 0, &PageQuery::default()).total_pages, 0);
    }
}
