//! Key and filter conditions.
//!
//! Conditions are validated before any network call; a condition missing its
//! operand never reaches a backend.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::Item;
use super::value;
use crate::core::BackendKind;
use crate::error::{DataError, DataResult};

/// Operators allowed in a key condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOperator {
    /// Exact match.
    #[serde(rename = "=")]
    Eq,
    /// Prefix match.
    #[serde(rename = "begins_with")]
    BeginsWith,
    /// Inclusive range.
    #[serde(rename = "between")]
    Between,
}

impl fmt::Display for KeyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOperator::Eq => write!(f, "="),
            KeyOperator::BeginsWith => write!(f, "begins_with"),
            KeyOperator::Between => write!(f, "between"),
        }
    }
}

/// A condition on a key attribute, used to select items in a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCondition {
    /// Attribute name.
    pub field: String,
    /// Operator.
    pub operator: KeyOperator,
    /// Operand (lower bound for `between`).
    pub value: Value,
    /// Upper bound; required iff the operator is `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
}

impl KeyCondition {
    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: KeyOperator::Eq,
            value: value.into(),
            value2: None,
        }
    }

    /// `begins_with(field, prefix)`.
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: KeyOperator::BeginsWith,
            value: prefix.into(),
            value2: None,
        }
    }

    /// `field BETWEEN low AND high`, inclusive.
    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: KeyOperator::Between,
            value: low.into(),
            value2: Some(high.into()),
        }
    }

    /// Checks operand presence and shape.
    pub fn validate(&self) -> DataResult<()> {
        validate_field(&self.field)?;
        if self.value.is_null() {
            return Err(DataError::validation(format!(
                "key condition on `{}` with operator `{}` requires a value",
                self.field, self.operator
            )));
        }
        match self.operator {
            KeyOperator::BeginsWith if !self.value.is_string() => {
                Err(DataError::validation(format!(
                    "begins_with on `{}` requires a string prefix",
                    self.field
                )))
            }
            KeyOperator::Between if self.value2.as_ref().is_none_or(Value::is_null) => {
                Err(DataError::validation(format!(
                    "between on `{}` requires both value and value2",
                    self.field
                )))
            }
            _ => Ok(()),
        }
    }

    /// Evaluates the condition against an item.
    pub fn matches(&self, item: &Item) -> bool {
        let Some(actual) = item.get(&self.field) else {
            return false;
        };
        match self.operator {
            KeyOperator::Eq => value::equals(actual, &self.value),
            KeyOperator::BeginsWith => match (actual, &self.value) {
                (Value::String(a), Value::String(prefix)) => a.starts_with(prefix.as_str()),
                _ => false,
            },
            KeyOperator::Between => {
                let Some(high) = &self.value2 else {
                    return false;
                };
                matches!(
                    value::compare(actual, &self.value),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    value::compare(actual, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
        }
    }
}

/// Operators allowed in a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Equal.
    #[serde(rename = "=")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=")]
    Ne,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Substring or list membership.
    #[serde(rename = "contains")]
    Contains,
    /// Attribute is present.
    #[serde(rename = "exists")]
    Exists,
    /// Attribute is absent.
    #[serde(rename = "not_exists")]
    NotExists,
    /// Attribute equals one of the listed values.
    #[serde(rename = "in")]
    In,
}

impl FilterOperator {
    /// Returns true if this operator needs a single `value` operand.
    pub fn requires_value(&self) -> bool {
        !matches!(
            self,
            FilterOperator::Exists | FilterOperator::NotExists | FilterOperator::In
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Ge => ">=",
            FilterOperator::Contains => "contains",
            FilterOperator::Exists => "exists",
            FilterOperator::NotExists => "not_exists",
            FilterOperator::In => "in",
        };
        write!(f, "{}", s)
    }
}

/// A predicate on an arbitrary attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Attribute name.
    pub field: String,
    /// Operator.
    pub operator: FilterOperator,
    /// Operand for comparison operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Operands for `in`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl FilterCondition {
    /// Creates a comparison condition.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            values: None,
        }
    }

    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Ne, value)
    }

    /// `contains(field, value)`.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    /// `field IN (values...)`.
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::In,
            value: None,
            values: Some(values),
        }
    }

    /// The attribute is present.
    pub fn exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Exists,
            value: None,
            values: None,
        }
    }

    /// The attribute is absent.
    pub fn not_exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::NotExists,
            value: None,
            values: None,
        }
    }

    /// Checks operand presence.
    pub fn validate(&self) -> DataResult<()> {
        validate_field(&self.field)?;
        if self.operator.requires_value() && self.value.as_ref().is_none_or(Value::is_null) {
            return Err(DataError::validation(format!(
                "filter on `{}` with operator `{}` requires a value",
                self.field, self.operator
            )));
        }
        if self.operator == FilterOperator::In
            && self.values.as_ref().is_none_or(|values| values.is_empty())
        {
            return Err(DataError::validation(format!(
                "filter on `{}` with operator `in` requires a non-empty values list",
                self.field
            )));
        }
        Ok(())
    }

    /// Returns the single operand, or a validation error.
    pub fn operand(&self) -> DataResult<&Value> {
        self.value.as_ref().ok_or_else(|| {
            DataError::validation(format!("filter on `{}` requires a value", self.field))
        })
    }

    /// Returns the `in` operands, or a validation error.
    pub fn operands(&self) -> DataResult<&[Value]> {
        match &self.values {
            Some(values) if !values.is_empty() => Ok(values),
            _ => Err(DataError::validation(format!(
                "filter on `{}` requires a non-empty values list",
                self.field
            ))),
        }
    }

    /// Evaluates the predicate against an item.
    ///
    /// Comparisons against a missing attribute are false, except `!=` and
    /// `not_exists`.
    pub fn matches(&self, item: &Item) -> bool {
        let actual = item.get(&self.field).filter(|v| !v.is_null());
        match self.operator {
            FilterOperator::Exists => actual.is_some(),
            FilterOperator::NotExists => actual.is_none(),
            FilterOperator::In => match (actual, &self.values) {
                (Some(actual), Some(values)) => values.iter().any(|v| value::equals(actual, v)),
                _ => false,
            },
            FilterOperator::Ne => match (actual, &self.value) {
                (Some(actual), Some(expected)) => !value::equals(actual, expected),
                (None, Some(_)) => true,
                _ => false,
            },
            FilterOperator::Contains => match (actual, &self.value) {
                (Some(actual), Some(needle)) => value::contains(actual, needle),
                _ => false,
            },
            operator => {
                let (Some(actual), Some(expected)) = (actual, &self.value) else {
                    return false;
                };
                if operator == FilterOperator::Eq {
                    return value::equals(actual, expected);
                }
                let Some(ordering) = value::compare(actual, expected) else {
                    return false;
                };
                match operator {
                    FilterOperator::Lt => ordering == Ordering::Less,
                    FilterOperator::Le => ordering != Ordering::Greater,
                    FilterOperator::Gt => ordering == Ordering::Greater,
                    FilterOperator::Ge => ordering != Ordering::Less,
                    _ => false,
                }
            }
        }
    }

    /// Evaluates the predicate the way `backend` would.
    ///
    /// The document store matches string `contains` case-insensitively; every
    /// other operator behaves as in [`matches`](Self::matches).
    pub fn matches_on(&self, item: &Item, backend: BackendKind) -> bool {
        match (self.operator, backend) {
            (FilterOperator::Contains, BackendKind::Document) => {
                let actual = item.get(&self.field).filter(|v| !v.is_null());
                match (actual, &self.value) {
                    (Some(actual), Some(needle)) => value::contains_ignore_case(actual, needle),
                    _ => false,
                }
            }
            _ => self.matches(item),
        }
    }
}

fn validate_field(field: &str) -> DataResult<()> {
    if field.trim().is_empty() {
        return Err(DataError::validation("condition field must not be empty"));
    }
    Ok(())
}
