//! Inbound request shapes: filters, sorts and list requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{condition::ConditionNode, page::PageSpec};

/// Everything that narrows a result set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilterRequest {
    /// The client's condition tree.
    #[serde(default)]
    pub condition: Option<ConditionNode>,
    /// Name of a server-defined segment, always AND-merged with the condition.
    #[serde(default)]
    pub segment: Option<String>,
    /// Free-text search term.
    #[serde(default)]
    pub search: Option<String>,
    /// Reference time of relative date operators such as `today` or `past`.
    #[serde(default = "Utc::now")]
    pub now: DateTime<Utc>,
}

impl Default for FilterRequest {
    fn default() -> Self {
        Self { condition: None, segment: None, search: None, now: Utc::now() }
    }
}

impl FilterRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, condition: ConditionNode) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// The search term, trimmed, when there is one.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|term| !term.is_empty())
    }

    /// Pins the reference time, making relative date operators reproducible.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Sort direction.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Sort on one field path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Ascending }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Descending }
    }

    /// Parses the `field` / `-field` shorthand.
    ///
    /// ```ignore
    /// assert_eq!(SortSpec::parse("-createdAt"), SortSpec::descending("createdAt"));
    /// ```
    pub fn parse(input: &str) -> Self {
        match input.trim().strip_prefix('-') {
            Some(field) => Self::descending(field),
            None => Self::ascending(input.trim()),
        }
    }
}

/// A list request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ListRequest {
    #[serde(default)]
    pub filter: FilterRequest,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub page: PageSpec,
    /// Restricts the returned fields. `_id` is always returned.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Whether belongs-to fields are hydrated with the referenced documents.
    #[serde(default)]
    pub hydrate: bool,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: FilterRequest) -> Self {
        self.filter = filter;
        self
    }

    pub fn condition(mut self, condition: ConditionNode) -> Self {
        self.filter.condition = Some(condition);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn page(mut self, page: PageSpec) -> Self {
        self.page = page;
        self
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn hydrate(mut self, hydrate: bool) -> Self {
        self.hydrate = hydrate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_shorthand() {
        assert_eq!(SortSpec::parse("-createdAt"), SortSpec::descending("createdAt"));
        assert_eq!(SortSpec::parse("name"), SortSpec::ascending("name"));
    }

    #[test]
    fn test_list_request_from_json() {
        let request: ListRequest = serde_json::from_str(
            r#"{
                "filter": { "search": "ada", "now": "2024-03-05T10:00:00Z" },
                "sort": { "field": "name", "direction": "descending" },
                "page": { "skip": 20, "limit": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(request.filter.search.as_deref(), Some("ada"));
        assert_eq!(request.sort, Some(SortSpec::descending("name")));
        assert_eq!(request.page, PageSpec::new(20, 10));
        assert!(!request.hydrate);
    }
}
