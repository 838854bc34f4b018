//! Adapter configuration.
//!
//! [`AdapterConfig`] is built once at startup, either through [`AdapterConfig::builder`]
//! or by deserializing it from JSON, and is then shared read-only (behind an `Arc`) by
//! every compiler and service.

use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;

/// Immutable settings shared by all adapter components.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AdapterConfig {
    /// Page size used when a list request does not specify one.
    pub default_page_size: u64,
    /// Upper bound for any requested page size.
    pub max_page_size: u64,
    /// Maximum number of relation hops a field path may cross.
    pub max_relation_depth: usize,
    /// Number of records fetched per batch by the exporter.
    pub export_batch_size: u64,
    /// Number of pie chart categories kept before the rest is folded into one bucket.
    pub pie_max_categories: Option<usize>,
    /// Label of the folded pie chart bucket.
    pub pie_others_label: String,
    /// Maximum number of buckets a line chart may span, zero-filled ones included.
    pub max_line_buckets: usize,
    /// Whether unlinking a has-many child also clears its back-reference field.
    pub clear_back_reference_on_dissociate: bool,
}

impl AdapterConfig {
    /// Creates a new configuration builder starting from the defaults.
    pub fn builder() -> AdapterConfigBuilder {
        AdapterConfigBuilder::new()
    }

    /// Parses a configuration from JSON; missing keys fall back to the defaults.
    pub fn from_json(input: &str) -> AdapterResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            default_page_size: 15,
            max_page_size: 100,
            max_relation_depth: 2,
            export_batch_size: 1000,
            pie_max_categories: None,
            pie_others_label: "Others".to_string(),
            max_line_buckets: 5000,
            clear_back_reference_on_dissociate: false,
        }
    }
}

/// Builder for [`AdapterConfig`].
#[derive(Debug, Clone, Default)]
pub struct AdapterConfigBuilder {
    config: AdapterConfig,
}

impl AdapterConfigBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self { config: AdapterConfig::default() }
    }

    /// Sets the page size used when none is requested.
    pub fn default_page_size(mut self, size: u64) -> Self {
        self.config.default_page_size = size;
        self
    }

    /// Sets the upper bound for requested page sizes.
    pub fn max_page_size(mut self, size: u64) -> Self {
        self.config.max_page_size = size;
        self
    }

    /// Sets the maximum number of relation hops in a field path.
    pub fn max_relation_depth(mut self, depth: usize) -> Self {
        self.config.max_relation_depth = depth;
        self
    }

    /// Sets the exporter batch size.
    pub fn export_batch_size(mut self, size: u64) -> Self {
        self.config.export_batch_size = size.max(1);
        self
    }

    /// Caps the number of pie chart categories.
    pub fn pie_max_categories(mut self, max: usize) -> Self {
        self.config.pie_max_categories = Some(max);
        self
    }

    /// Sets the label of the folded pie chart bucket.
    pub fn pie_others_label(mut self, label: impl Into<String>) -> Self {
        self.config.pie_others_label = label.into();
        self
    }

    /// Caps the number of buckets of a line chart.
    pub fn max_line_buckets(mut self, max: usize) -> Self {
        self.config.max_line_buckets = max;
        self
    }

    /// Makes unlinking a has-many child also clear its back-reference.
    pub fn clear_back_reference_on_dissociate(mut self, clear: bool) -> Self {
        self.config.clear_back_reference_on_dissociate = clear;
        self
    }

    /// Builds the final configuration.
    pub fn build(self) -> AdapterConfig {
        self.config
    }
}
