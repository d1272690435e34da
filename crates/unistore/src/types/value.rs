//! Helpers for comparing and combining attribute values.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Compares two attribute values of the same scalar type.
///
/// Numbers compare numerically, strings lexicographically, booleans with
/// `false < true`. Values of different types are unordered.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Returns true if two values are equal, treating numbers numerically.
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

/// Adds two numbers, staying integral when both operands are integers.
pub fn add_numbers(left: &Number, right: &Number) -> Option<Number> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return a.checked_add(b).map(Number::from);
    }
    Number::from_f64(left.as_f64()? + right.as_f64()?)
}

/// Returns true if `haystack` contains `needle`.
///
/// Strings match by substring, arrays by element equality.
pub fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), needle) => items.iter().any(|item| equals(item, needle)),
        _ => false,
    }
}

/// Like [`contains`], but string substrings match regardless of case.
pub fn contains_ignore_case(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.to_lowercase().contains(&n.to_lowercase()),
        _ => contains(haystack, needle),
    }
}
