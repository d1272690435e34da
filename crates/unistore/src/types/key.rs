//! Item keys and the item representation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{DataError, DataResult};

/// An item: a JSON object of attribute name to value.
pub type Item = Map<String, Value>;

/// Attribute holding the partition value on persisted items.
pub const PARTITION_ATTRIBUTE: &str = "pk";

/// Attribute holding the sort value on persisted items.
pub const SORT_ATTRIBUTE: &str = "sk";

/// Input alias accepted for [`PARTITION_ATTRIBUTE`].
pub const PRIMARY_ALIAS: &str = "primary";

/// Input alias accepted for [`SORT_ATTRIBUTE`].
pub const SORT_ALIAS: &str = "sort";

/// A key component: either a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// String key component.
    String(String),
    /// Numeric key component.
    Number(Number),
}

impl KeyValue {
    /// Converts a JSON value into a key component.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(KeyValue::String(s.clone())),
            Value::Number(n) => Some(KeyValue::Number(n.clone())),
            _ => None,
        }
    }

    /// Returns the key component as a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::Number(n) => Value::Number(n.clone()),
        }
    }

    /// Returns the string form, if this is a string component.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::String(s) => Some(s),
            KeyValue::Number(_) => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::String(s) => write!(f, "{}", s),
            KeyValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::String(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::String(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Number(Number::from(value))
    }
}

impl From<u64> for KeyValue {
    fn from(value: u64) -> Self {
        KeyValue::Number(Number::from(value))
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Number(Number::from(value))
    }
}

/// Identifies one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseKey {
    /// Partition value.
    pub primary: KeyValue,
    /// Optional sort value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<KeyValue>,
}

impl DatabaseKey {
    /// Creates a key with only a partition value.
    pub fn new(primary: impl Into<KeyValue>) -> Self {
        Self {
            primary: primary.into(),
            sort: None,
        }
    }

    /// Creates a key with partition and sort values.
    pub fn with_sort(primary: impl Into<KeyValue>, sort: impl Into<KeyValue>) -> Self {
        Self {
            primary: primary.into(),
            sort: Some(sort.into()),
        }
    }

    /// Checks the key invariants.
    pub fn validate(&self) -> DataResult<()> {
        if let KeyValue::String(s) = &self.primary {
            if s.is_empty() {
                return Err(DataError::validation("key.primary must not be empty"));
            }
        }
        if let Some(KeyValue::String(s)) = &self.sort {
            if s.is_empty() {
                return Err(DataError::validation(
                    "key.sort must not be empty when provided",
                ));
            }
        }
        Ok(())
    }

    /// Returns the derived composite form `primary#sort`, or `primary` alone.
    pub fn composite(&self) -> String {
        match &self.sort {
            Some(sort) => format!("{}#{}", self.primary, sort),
            None => self.primary.to_string(),
        }
    }

    /// Returns the logical namespace of the key: the primary text before the
    /// first `#`, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.primary
            .as_str()
            .and_then(|p| p.split_once('#').map(|(prefix, _)| prefix))
            .filter(|prefix| !prefix.is_empty())
    }

    /// Extracts the key from an item's `pk`/`sk` attributes, falling back to the
    /// `primary`/`sort` aliases.
    pub fn from_item(item: &Item) -> DataResult<Self> {
        let primary = item
            .get(PARTITION_ATTRIBUTE)
            .or_else(|| item.get(PRIMARY_ALIAS))
            .ok_or_else(|| {
                DataError::validation("item must carry a partition key (`pk` or `primary`)")
            })?;
        let primary = KeyValue::from_json(primary).ok_or_else(|| {
            DataError::validation("partition key must be a string or a number")
        })?;

        let sort = match item.get(SORT_ATTRIBUTE).or_else(|| item.get(SORT_ALIAS)) {
            None | Some(Value::Null) => None,
            Some(value) => Some(KeyValue::from_json(value).ok_or_else(|| {
                DataError::validation("sort key must be a string or a number")
            })?),
        };

        let key = Self { primary, sort };
        key.validate()?;
        Ok(key)
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "({}, {})", self.primary, sort),
            None => write!(f, "({})", self.primary),
        }
    }
}

/// Rewrites `primary`/`sort` aliases on an item to `pk`/`sk`.
///
/// Returns the item's key. Explicit `pk`/`sk` attributes win over aliases.
pub fn normalize_item_key(item: &mut Item) -> DataResult<DatabaseKey> {
    let key = DatabaseKey::from_item(item)?;
    item.remove(PRIMARY_ALIAS);
    item.remove(SORT_ALIAS);
    item.insert(PARTITION_ATTRIBUTE.to_string(), key.primary.to_json());
    match &key.sort {
        Some(sort) => {
            item.insert(SORT_ATTRIBUTE.to_string(), sort.to_json());
        }
        None => {
            item.remove(SORT_ATTRIBUTE);
        }
    }
    Ok(key)
}
