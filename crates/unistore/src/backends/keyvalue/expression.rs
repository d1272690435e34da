//! Compiles unified conditions and updates into key-value expressions.
//!
//! Attribute names become `#nN` placeholders and values become `:vN`
//! placeholders, so reserved words and special characters never reach the
//! expression text. One [`ExpressionBuilder`] is shared by all expressions of a
//! single request because the backend takes one placeholder map per request.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::BackendKind;
use crate::error::{DataError, DataResult};
use crate::types::{
    FilterCondition, FilterOperator, Item, KeyCondition, KeyOperator, UpdateInput, value,
};

/// Placeholder maps for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionAttributes {
    /// `#nN` placeholder to attribute name.
    pub names: BTreeMap<String, String>,
    /// `:vN` placeholder to value.
    pub values: Item,
}

impl ExpressionAttributes {
    /// Returns true if no placeholders were allocated.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.values.is_empty()
    }
}

/// Allocates placeholders and renders expressions.
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    attributes: ExpressionAttributes,
    name_index: BTreeMap<String, String>,
    next_value: usize,
}

impl ExpressionBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the placeholder for an attribute name, reusing earlier ones.
    pub fn name(&mut self, field: &str) -> String {
        if let Some(placeholder) = self.name_index.get(field) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.name_index.len());
        self.name_index
            .insert(field.to_string(), placeholder.clone());
        self.attributes
            .names
            .insert(placeholder.clone(), field.to_string());
        placeholder
    }

    /// Allocates a placeholder for a value.
    pub fn value(&mut self, value: Value) -> String {
        let placeholder = format!(":v{}", self.next_value);
        self.next_value += 1;
        self.attributes.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Compiles a key condition.
    pub fn key_condition(&mut self, condition: &KeyCondition) -> DataResult<String> {
        condition.validate()?;
        let name = self.name(&condition.field);
        let value = self.value(condition.value.clone());
        Ok(match condition.operator {
            KeyOperator::Eq => format!("{} = {}", name, value),
            KeyOperator::BeginsWith => format!("begins_with({}, {})", name, value),
            KeyOperator::Between => {
                let high = self.value(condition.value2.clone().unwrap_or(Value::Null));
                format!("{} BETWEEN {} AND {}", name, value, high)
            }
        })
    }

    /// Compiles a filter or write condition.
    pub fn filter(&mut self, condition: &FilterCondition) -> DataResult<String> {
        condition.validate()?;
        let name = self.name(&condition.field);
        let comparison = |op: &str, builder: &mut Self| -> DataResult<String> {
            let value = builder.value(condition.operand()?.clone());
            Ok(format!("{} {} {}", name, op, value))
        };
        match condition.operator {
            FilterOperator::Eq => comparison("=", self),
            FilterOperator::Ne => comparison("<>", self),
            FilterOperator::Lt => comparison("<", self),
            FilterOperator::Le => comparison("<=", self),
            FilterOperator::Gt => comparison(">", self),
            FilterOperator::Ge => comparison(">=", self),
            FilterOperator::Contains => {
                let value = self.value(condition.operand()?.clone());
                Ok(format!("contains({}, {})", name, value))
            }
            FilterOperator::Exists => Ok(format!("attribute_exists({})", name)),
            FilterOperator::NotExists => Ok(format!("attribute_not_exists({})", name)),
            FilterOperator::In => {
                let placeholders: Vec<String> = condition
                    .operands()?
                    .iter()
                    .map(|v| self.value(v.clone()))
                    .collect();
                Ok(format!("{} IN ({})", name, placeholders.join(", ")))
            }
        }
    }

    /// Compiles a projection list.
    pub fn projection(&mut self, fields: &[String]) -> Option<String> {
        if fields.is_empty() {
            return None;
        }
        let names: Vec<String> = fields.iter().map(|f| self.name(f)).collect();
        Some(names.join(", "))
    }

    /// Compiles an update into `SET`, `ADD` and `REMOVE` clauses.
    ///
    /// Appends use `list_append(if_not_exists(#n, :empty), :v)` so appending to
    /// a missing attribute creates the list. Arrays are stored as lists, which
    /// the backend cannot `DELETE` from, so value removals are resolved
    /// against `current` into a `SET` of the remaining elements. Each resolved
    /// list yields a guard that must join the write condition; it fails the
    /// write if the attribute changed since `current` was read.
    pub fn update(&mut self, input: &UpdateInput, current: Option<&Item>) -> DataResult<CompiledUpdate> {
        input.validate()?;

        let mut set = Vec::new();
        for (field, value) in input.assignments() {
            let name = self.name(field);
            let value = self.value(value.clone());
            set.push(format!("{} = {}", name, value));
        }
        for (field, values) in &input.append {
            let name = self.name(field);
            let empty = self.value(Value::Array(Vec::new()));
            let values = self.value(Value::Array(values.clone()));
            set.push(format!(
                "{} = list_append(if_not_exists({}, {}), {})",
                name, name, empty, values
            ));
        }

        let mut guards = Vec::new();
        for (field, removed) in &input.remove {
            let name = self.name(field);
            match current.and_then(|item| item.get(field)) {
                None => guards.push(format!("attribute_not_exists({})", name)),
                Some(Value::Array(existing)) => {
                    let expected = self.value(Value::Array(existing.clone()));
                    guards.push(format!("{} = {}", name, expected));
                    let remaining: Vec<Value> = existing
                        .iter()
                        .filter(|v| !removed.iter().any(|r| value::equals(v, r)))
                        .cloned()
                        .collect();
                    if remaining.len() != existing.len() {
                        let remaining = self.value(Value::Array(remaining));
                        set.push(format!("{} = {}", name, remaining));
                    }
                }
                Some(_) => {
                    return Err(DataError::validation(format!(
                        "cannot remove values from non-list attribute `{}`",
                        field
                    ))
                    .with_backend(BackendKind::KeyValue));
                }
            }
        }

        let add: Vec<String> = input
            .increment
            .iter()
            .map(|(field, delta)| {
                let name = self.name(field);
                let value = self.value(delta.clone());
                format!("{} {}", name, value)
            })
            .collect();

        let remove: Vec<String> = input.removals().map(|field| self.name(field)).collect();

        let mut clauses = Vec::new();
        if !set.is_empty() {
            clauses.push(format!("SET {}", set.join(", ")));
        }
        if !add.is_empty() {
            clauses.push(format!("ADD {}", add.join(", ")));
        }
        if !remove.is_empty() {
            clauses.push(format!("REMOVE {}", remove.join(", ")));
        }
        Ok(CompiledUpdate {
            expression: clauses.join(" "),
            guards,
        })
    }

    /// Returns the attributes allocated so far.
    pub fn attributes(&self) -> &ExpressionAttributes {
        &self.attributes
    }

    /// Consumes the builder, returning the placeholder maps.
    pub fn finish(self) -> ExpressionAttributes {
        self.attributes
    }
}

/// A compiled update expression and the guards it depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledUpdate {
    /// The update expression; empty when nothing changes.
    pub expression: String,
    /// Conditions pinning list attributes to the values they were resolved from.
    pub guards: Vec<String>,
}

impl CompiledUpdate {
    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.expression.is_empty()
    }
}

/// Joins conditions with `AND`.
pub fn and_all(clauses: Vec<String>) -> Option<String> {
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}
