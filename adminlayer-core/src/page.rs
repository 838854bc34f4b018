//! Pagination types.
//!
//! [`PageSpec`] is what a client asks for; [`PageSpec::clamp`] turns it into a bounded
//! `(skip, limit)` window no matter what was requested. [`Page`] is the list response
//! shape: the requested slice plus the total count of the unpaginated result.

use serde::{Deserialize, Serialize};

use crate::config::AdapterConfig;

/// Requested window of a list.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageSpec {
    /// Number of records to skip.
    #[serde(default)]
    pub skip: u64,
    /// Number of records to return. Falls back to the configured default.
    #[serde(default)]
    pub limit: Option<u64>,
}

impl PageSpec {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self { skip, limit: Some(limit) }
    }

    /// Builds a window from a 1-indexed page number and a page size.
    ///
    /// ```ignore
    /// let page = PageSpec::from_page(3, 20);
    /// assert_eq!(page.skip, 40);
    /// ```
    pub fn from_page(number: u64, size: u64) -> Self {
        Self { skip: number.saturating_sub(1).saturating_mul(size), limit: Some(size) }
    }

    /// Applies the configured default and maximum page sizes.
    pub fn clamp(&self, config: &AdapterConfig) -> Window {
        Window {
            skip: self.skip,
            limit: self
                .limit
                .unwrap_or(config.default_page_size)
                .min(config.max_page_size),
        }
    }
}

/// A bounded `(skip, limit)` pair ready for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub skip: u64,
    pub limit: u64,
}

/// Count metadata of a list response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageMeta {
    /// Number of matching records, ignoring pagination.
    pub count: u64,
}

/// One page of a list response.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, count: u64) -> Self {
        Self { records, meta: PageMeta { count } }
    }

    pub fn count(&self) -> u64 {
        self.meta.count
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self { records: Vec::new(), meta: PageMeta::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_page() {
        assert_eq!(PageSpec::from_page(1, 20), PageSpec::new(0, 20));
        assert_eq!(PageSpec::from_page(3, 20), PageSpec::new(40, 20));
        assert_eq!(PageSpec::from_page(0, 20), PageSpec::new(0, 20));
    }

    #[test]
    fn test_clamp_applies_default_and_maximum() {
        let config = AdapterConfig::builder()
            .default_page_size(10)
            .max_page_size(50)
            .build();

        assert_eq!(PageSpec::default().clamp(&config), Window { skip: 0, limit: 10 });
        assert_eq!(PageSpec::new(5, 500).clamp(&config), Window { skip: 5, limit: 50 });
        assert_eq!(PageSpec::new(5, 20).clamp(&config), Window { skip: 5, limit: 20 });
    }
}
