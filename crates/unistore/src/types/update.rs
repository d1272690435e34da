//! Partial updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::FilterCondition;
use super::key::{DatabaseKey, Item, PARTITION_ATTRIBUTE, SORT_ATTRIBUTE};
use crate::error::{DataError, DataResult};

/// A partial update of one item.
///
/// `updates` replaces attribute values (a `null` removes the attribute),
/// `increment` adds numeric deltas, `append` appends to lists, and `remove`
/// deletes values from lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInput {
    /// The item to update.
    pub key: DatabaseKey,
    /// Attribute replacements.
    #[serde(default)]
    pub updates: Item,
    /// Condition the stored item must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FilterCondition>,
    /// Numeric deltas.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub increment: BTreeMap<String, Value>,
    /// Values appended to list attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub append: BTreeMap<String, Vec<Value>>,
    /// Values removed from list attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remove: BTreeMap<String, Vec<Value>>,
}

impl UpdateInput {
    /// Creates an empty update for a key.
    pub fn new(key: DatabaseKey) -> Self {
        Self {
            key,
            updates: Item::new(),
            condition: None,
            increment: BTreeMap::new(),
            append: BTreeMap::new(),
            remove: BTreeMap::new(),
        }
    }

    /// Replaces an attribute value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates.insert(field.into(), value.into());
        self
    }

    /// Removes an attribute.
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.updates.insert(field.into(), Value::Null);
        self
    }

    /// Adds a numeric delta.
    pub fn increment(mut self, field: impl Into<String>, delta: impl Into<Value>) -> Self {
        self.increment.insert(field.into(), delta.into());
        self
    }

    /// Appends values to a list attribute.
    pub fn append(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.append.insert(field.into(), values);
        self
    }

    /// Removes values from a list attribute.
    pub fn remove(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.remove.insert(field.into(), values);
        self
    }

    /// Requires the stored item to satisfy a condition.
    pub fn with_condition(mut self, condition: FilterCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Returns true if the update carries no change.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
            && self.increment.is_empty()
            && self.append.is_empty()
            && self.remove.is_empty()
    }

    /// Returns the attributes with a `null` value.
    pub fn removals(&self) -> impl Iterator<Item = &String> {
        self.updates
            .iter()
            .filter(|(_, value)| value.is_null())
            .map(|(field, _)| field)
    }

    /// Returns the attributes with a non-null replacement.
    pub fn assignments(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.updates.iter().filter(|(_, value)| !value.is_null())
    }

    /// Checks the key, the presence of a change, and operand shapes.
    pub fn validate(&self) -> DataResult<()> {
        self.key.validate()?;
        if self.is_empty() {
            return Err(DataError::validation(
                "update must carry at least one change",
            ));
        }
        let touches_key = self
            .updates
            .keys()
            .chain(self.increment.keys())
            .chain(self.append.keys())
            .chain(self.remove.keys())
            .any(|field| field == PARTITION_ATTRIBUTE || field == SORT_ATTRIBUTE);
        if touches_key {
            return Err(DataError::validation("key attributes cannot be updated"));
        }
        for (field, delta) in &self.increment {
            if !delta.is_number() {
                return Err(DataError::validation(format!(
                    "increment for `{}` must be numeric",
                    field
                )));
            }
        }
        if let Some(condition) = &self.condition {
            condition.validate()?;
        }
        Ok(())
    }
}
