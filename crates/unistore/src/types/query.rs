//! Query and scan inputs and their paged result.

use serde::{Deserialize, Serialize};

use super::condition::{FilterCondition, KeyCondition};
use super::key::Item;
use crate::error::{DataError, DataResult};

/// Result ordering on the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// A key-condition query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    /// Selects items by key. Required by the key-value backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_condition: Option<KeyCondition>,
    /// Post-selection filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterCondition>,
    /// Attributes to return; all when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<String>,
    /// Secondary index to query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    /// Maximum number of items to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Ordering on the sort key.
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Resume position from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl QueryInput {
    /// Creates a query selecting by the given key condition.
    pub fn new(key_condition: KeyCondition) -> Self {
        Self {
            key_condition: Some(key_condition),
            ..Default::default()
        }
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: FilterCondition) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the projection.
    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the index.
    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Sets the limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the sort order.
    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Sets the resume cursor.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Validates the conditions and limit.
    pub fn validate(&self) -> DataResult<()> {
        if let Some(key_condition) = &self.key_condition {
            key_condition.validate()?;
        }
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        validate_limit(self.limit)
    }
}

/// A full scan with an optional filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInput {
    /// Filter applied to every item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterCondition>,
    /// Attributes to return; all when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<String>,
    /// Secondary index to scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    /// Maximum number of items per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Resume position from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl ScanInput {
    /// Creates an unfiltered scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: FilterCondition) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the projection.
    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the resume cursor.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Validates the filter and limit.
    pub fn validate(&self) -> DataResult<()> {
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        validate_limit(self.limit)
    }
}

fn validate_limit(limit: Option<u32>) -> DataResult<()> {
    if limit == Some(0) {
        return Err(DataError::validation("limit must be greater than zero"));
    }
    Ok(())
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// The items in this page.
    pub items: Vec<Item>,
    /// Cursor for the next page; `None` at the end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl Page {
    /// Creates a page.
    pub fn new(items: Vec<Item>, cursor: Option<String>) -> Self {
        Self { items, cursor }
    }

    /// Returns true if more pages follow.
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}
