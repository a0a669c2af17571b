//! Pagination types for the query-projection contract.
//!
//! Every paginated read returns `{data, pagination}` where `pagination`
//! carries `{total, page, limit, pages, hasNext, hasPrev}`. Page numbers are
//! 1-based; limits are clamped to the configured bounds.

use crate::config::EngineSettings;
use serde::{Deserialize, Serialize};

/// Sort direction for a query.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// A page request: 1-based page number, page size, optional sort.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Field to sort by (projection-defined).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl PageRequest {
    /// First page at the given limit.
    #[must_use]
    pub const fn first(limit: u32) -> Self {
        Self {
            page: 1,
            limit,
            sort_by: None,
            direction: SortDirection::Asc,
        }
    }

    /// Clamp the request against configured bounds: a zero page becomes 1, a
    /// zero limit becomes the default, anything above the maximum is capped.
    #[must_use]
    pub fn clamped(mut self, settings: &EngineSettings) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        if self.limit == 0 {
            self.limit = settings.pagination_default_limit;
        }
        self.limit = self.limit.min(settings.pagination_max_limit);
        self
    }

    /// Number of items to skip.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Self::first(settings.pagination_default_limit)
    }
}

/// Pagination envelope for a query result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Total matching documents.
    pub total: u64,
    /// 1-based page number served.
    pub page: u32,
    /// Page size served.
    pub limit: u32,
    /// Total number of pages.
    pub pages: u32,
    /// Whether a later page exists.
    pub has_next: bool,
    /// Whether an earlier page exists.
    pub has_prev: bool,
}

/// A page of results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The documents on this page.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Assemble a page from the matching slice and the total match count.
    #[must_use]
    pub fn new(data: Vec<T>, total: u64, request: &PageRequest) -> Self {
        let limit = request.limit.max(1);
        let pages = u32::try_from(total.div_ceil(u64::from(limit))).unwrap_or(u32::MAX);
        let pagination = Pagination {
            total,
            page: request.page,
            limit,
            pages,
            has_next: request.page < pages,
            has_prev: request.page > 1 && total > 0,
        };
        Self { data, pagination }
    }

    /// Map the page's items, keeping the pagination envelope.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_applies_defaults_and_caps() {
        let settings = EngineSettings::default();

        let zeroed = PageRequest {
            page: 0,
            limit: 0,
            sort_by: None,
            direction: SortDirection::Asc,
        }
        .clamped(&settings);
        assert_eq!(zeroed.page, 1);
        assert_eq!(zeroed.limit, 10);

        let oversized = PageRequest::first(10_000).clamped(&settings);
        assert_eq!(oversized.limit, 100);
    }

    #[test]
    fn offsets() {
        assert_eq!(PageRequest::first(10).offset(), 0);
        let third = PageRequest {
            page: 3,
            limit: 25,
            sort_by: None,
            direction: SortDirection::Asc,
        };
        assert_eq!(third.offset(), 50);
    }

    #[test]
    fn page_math() {
        let request = PageRequest {
            page: 2,
            limit: 10,
            sort_by: None,
            direction: SortDirection::Asc,
        };
        let page = Page::new(vec![1, 2, 3], 23, &request);

        assert_eq!(page.pagination.pages, 3);
        assert!(page.pagination.has_next);
        assert!(page.pagination.has_prev);
        assert_eq!(page.pagination.total, 23);
    }

    #[test]
    fn single_page_has_no_neighbours() {
        let page = Page::new(vec![1], 1, &PageRequest::first(10));
        assert_eq!(page.pagination.pages, 1);
        assert!(!page.pagination.has_next);
        assert!(!page.pagination.has_prev);
    }

    #[test]
    fn empty_result() {
        let page: Page<u8> = Page::new(vec![], 0, &PageRequest::first(10));
        assert_eq!(page.pagination.pages, 0);
        assert!(!page.pagination.has_next);
        assert!(!page.pagination.has_prev);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn wire_shape_is_camel_case() {
        let page = Page::new(vec![1], 1, &PageRequest::first(10));
        let json = serde_json::to_value(&page).unwrap();
        assert!(json["pagination"].get("hasNext").is_some());
        assert!(json["pagination"].get("hasPrev").is_some());
    }
}
