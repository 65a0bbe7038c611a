//! Page selection for `GET /accounts`.
//!
//! Pages are 1-based. `per_page` is clamped to `1..=MAX_PAGE_SIZE`, so a
//! listing never scans more than one bounded slice of the accounts table
//! inside its read-only transaction.

use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::config::{DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// 1-based page number
    #[serde(default = "default_page")]
    #[param(example = 1)]
    pub page: u64,
    /// Accounts per page, at most 100
    #[serde(default = "default_per_page")]
    #[param(example = 20)]
    pub per_page: u64,
}

fn default_page() -> u64 {
    DEFAULT_PAGE_NUMBER
}

fn default_per_page() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl PaginationParams {
    /// Rows to skip: `OFFSET` for the listing query
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit())
    }

    /// `LIMIT` for the listing query
    pub fn limit(&self) -> u64 {
        self.per_page.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE_NUMBER,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of a listing plus where it sits in the whole.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
    /// Whether a later page exists
    pub has_next: bool,
}

impl<T> Paginated<T> {
    /// Build a page from the rows the listing query returned and the
    /// table's total count.
    pub fn new(data: Vec<T>, page: u64, per_page: u64, total: u64) -> Self {
        let total_pages = if per_page > 0 { total.div_ceil(per_page) } else { 0 };

        Self {
            data,
            meta: PaginationMeta {
                page,
                per_page,
                total,
                total_pages,
                has_next: page < total_pages,
            },
        }
    }

    /// Convert rows to their response type, keeping the metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_offset_are_bounded() {
        let params = PaginationParams {
            page: 3,
            per_page: 1_000,
        };
        assert_eq!(params.limit(), MAX_PAGE_SIZE);
        assert_eq!(params.offset(), 2 * MAX_PAGE_SIZE);

        let zero = PaginationParams { page: 0, per_page: 0 };
        assert_eq!(zero.limit(), 1);
        assert_eq!(zero.offset(), 0);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let page = Paginated::new(vec![1, 2], 1, 2, 5);
        assert_eq!(page.meta.total_pages, 3);
        assert!(page.meta.has_next);
        assert_eq!(page.map(|n| n * 10).data, vec![10, 20]);
    }

    #[test]
    fn test_last_page_and_empty_table() {
        let last = Paginated::new(vec!["erin"], 3, 2, 5);
        assert!(!last.meta.has_next);

        let empty = Paginated::<u8>::new(Vec::new(), 1, 20, 0);
        assert_eq!(empty.meta.total_pages, 0);
        assert!(!empty.meta.has_next);
    }

    #[test]
    fn test_query_defaults() {
        let params: PaginationParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, PaginationParams::default());
        assert_eq!(params.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(params.offset(), 0);
    }
}
