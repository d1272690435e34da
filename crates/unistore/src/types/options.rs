//! Per-call operation options.

use serde::{Deserialize, Serialize};

use super::condition::FilterCondition;
use crate::error::DataResult;

/// Options for `get`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetOptions {
    /// Request a strongly consistent read where supported.
    #[serde(default)]
    pub consistent_read: bool,
    /// Attributes to return; all when empty.
    #[serde(default)]
    pub projection: Vec<String>,
}

impl GetOptions {
    /// Requests a strongly consistent read.
    pub fn consistent() -> Self {
        Self {
            consistent_read: true,
            ..Default::default()
        }
    }
}

/// Options for `put`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutOptions {
    /// Condition the stored item must satisfy.
    #[serde(default)]
    pub condition: Option<FilterCondition>,
    /// Only write when no item exists under the key.
    #[serde(default)]
    pub if_not_exists: bool,
}

impl PutOptions {
    /// Only write when no item exists under the key.
    pub fn if_not_exists() -> Self {
        Self {
            condition: None,
            if_not_exists: true,
        }
    }

    /// Requires the stored item to satisfy a condition.
    pub fn with_condition(condition: FilterCondition) -> Self {
        Self {
            condition: Some(condition),
            if_not_exists: false,
        }
    }

    /// Validates the condition, if any.
    pub fn validate(&self) -> DataResult<()> {
        match &self.condition {
            Some(condition) => condition.validate(),
            None => Ok(()),
        }
    }
}

/// Options for `delete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Condition the stored item must satisfy.
    #[serde(default)]
    pub condition: Option<FilterCondition>,
}

impl DeleteOptions {
    /// Validates the condition, if any.
    pub fn validate(&self) -> DataResult<()> {
        match &self.condition {
            Some(condition) => condition.validate(),
            None => Ok(()),
        }
    }
}

/// Options for `batch_get`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGetOptions {
    /// Request strongly consistent reads where supported.
    #[serde(default)]
    pub consistent_read: bool,
    /// Attributes to return; all when empty.
    #[serde(default)]
    pub projection: Vec<String>,
}
