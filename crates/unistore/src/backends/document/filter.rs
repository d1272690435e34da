//! Compiles unified conditions and updates into document query operators.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::error::DataResult;
use crate::types::{
    DatabaseKey, FilterCondition, FilterOperator, Item, KeyCondition, KeyOperator,
    PARTITION_ATTRIBUTE, SORT_ATTRIBUTE, UpdateInput,
};

/// Attribute holding the derived `primary#sort` composite.
pub const COMPOSITE_ATTRIBUTE: &str = "pksk";

/// Creation timestamp attribute.
pub const CREATED_AT: &str = "createdAt";

/// Modification timestamp attribute.
pub const UPDATED_AT: &str = "updatedAt";

/// Native document id, stripped from every item read.
pub const DOCUMENT_ID: &str = "_id";

/// Formats a timestamp the way documents store it.
pub fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn object(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        _ => Item::new(),
    }
}

fn single(field: &str, clause: Value) -> Item {
    let mut filter = Item::new();
    filter.insert(field.to_string(), clause);
    filter
}

/// Filter selecting one item by key.
pub fn key_filter(key: &DatabaseKey) -> Item {
    single(COMPOSITE_ATTRIBUTE, Value::String(key.composite()))
}

/// Compiles a key condition.
pub fn key_condition(condition: &KeyCondition) -> DataResult<Item> {
    condition.validate()?;
    let clause = match condition.operator {
        KeyOperator::Eq => json!({ "$eq": condition.value }),
        KeyOperator::BeginsWith => {
            let prefix = condition.value.as_str().unwrap_or_default();
            json!({ "$regex": format!("^{}", regex::escape(prefix)) })
        }
        KeyOperator::Between => json!({
            "$gte": condition.value,
            "$lte": condition.value2.clone().unwrap_or(Value::Null),
        }),
    };
    Ok(single(&condition.field, clause))
}

/// Compiles a filter condition.
///
/// `contains` on a string operand becomes a case-insensitive escaped regex;
/// on any other operand it matches array elements by equality.
pub fn filter_condition(condition: &FilterCondition) -> DataResult<Item> {
    condition.validate()?;
    let clause = match condition.operator {
        FilterOperator::Eq => json!({ "$eq": condition.operand()? }),
        FilterOperator::Ne => json!({ "$ne": condition.operand()? }),
        FilterOperator::Lt => json!({ "$lt": condition.operand()? }),
        FilterOperator::Le => json!({ "$lte": condition.operand()? }),
        FilterOperator::Gt => json!({ "$gt": condition.operand()? }),
        FilterOperator::Ge => json!({ "$gte": condition.operand()? }),
        FilterOperator::Contains => match condition.operand()? {
            Value::String(needle) => json!({
                "$regex": regex::escape(needle),
                "$options": "i",
            }),
            other => json!({ "$elemMatch": { "$eq": other } }),
        },
        FilterOperator::Exists => json!({ "$exists": true }),
        FilterOperator::NotExists => json!({ "$exists": false }),
        FilterOperator::In => json!({ "$in": condition.operands()? }),
    };
    Ok(single(&condition.field, clause))
}

/// Combines filters with `$and`; a single filter is returned unchanged.
pub fn and_all(mut filters: Vec<Item>) -> Item {
    match filters.len() {
        0 => Item::new(),
        1 => filters.pop().unwrap_or_default(),
        _ => single(
            "$and",
            Value::Array(filters.into_iter().map(Value::Object).collect()),
        ),
    }
}

/// Filter matching any of the given keys.
pub fn any_key(keys: &[DatabaseKey]) -> Item {
    let clauses: Vec<Value> = keys.iter().map(|k| Value::Object(key_filter(k))).collect();
    single("$or", Value::Array(clauses))
}

/// Compiles a projection list.
pub fn projection(fields: &[String]) -> Option<Item> {
    if fields.is_empty() {
        return None;
    }
    Some(fields.iter().map(|f| (f.clone(), json!(1))).collect())
}

/// Key attributes written on insert.
pub fn key_attributes(key: &DatabaseKey) -> Item {
    let mut attrs = Item::new();
    attrs.insert(PARTITION_ATTRIBUTE.to_string(), key.primary.to_json());
    if let Some(sort) = &key.sort {
        attrs.insert(SORT_ATTRIBUTE.to_string(), sort.to_json());
    }
    attrs.insert(
        COMPOSITE_ATTRIBUTE.to_string(),
        Value::String(key.composite()),
    );
    attrs
}

/// Compiles an update into `$set`, `$inc`, `$push`, `$pullAll` and `$unset`.
///
/// `updatedAt` is always set. With `upsert`, key attributes and `createdAt`
/// are written through `$setOnInsert`.
pub fn update_document(input: &UpdateInput, now: DateTime<Utc>, upsert: bool) -> DataResult<Item> {
    input.validate()?;
    let mut update = Item::new();

    let mut set: Item = input
        .assignments()
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    set.insert(UPDATED_AT.to_string(), timestamp(now));
    update.insert("$set".to_string(), Value::Object(set));

    if !input.increment.is_empty() {
        let inc: Item = input
            .increment
            .iter()
            .map(|(field, delta)| (field.clone(), delta.clone()))
            .collect();
        update.insert("$inc".to_string(), Value::Object(inc));
    }
    if !input.append.is_empty() {
        let push: Item = input
            .append
            .iter()
            .map(|(field, values)| (field.clone(), json!({ "$each": values })))
            .collect();
        update.insert("$push".to_string(), Value::Object(push));
    }
    if !input.remove.is_empty() {
        let pull: Item = input
            .remove
            .iter()
            .map(|(field, values)| (field.clone(), Value::Array(values.clone())))
            .collect();
        update.insert("$pullAll".to_string(), Value::Object(pull));
    }
    let unset: Item = input
        .removals()
        .map(|field| (field.clone(), Value::String(String::new())))
        .collect();
    if !unset.is_empty() {
        update.insert("$unset".to_string(), Value::Object(unset));
    }
    if upsert {
        let mut on_insert = key_attributes(&input.key);
        on_insert.insert(CREATED_AT.to_string(), timestamp(now));
        update.insert("$setOnInsert".to_string(), Value::Object(on_insert));
    }
    Ok(update)
}

/// Builds the stored document for a put: key attributes, composite and
/// timestamps. An existing `createdAt` on the input is kept.
pub fn put_document(mut item: Item, key: &DatabaseKey, now: DateTime<Utc>) -> Item {
    item.remove(DOCUMENT_ID);
    item.extend(key_attributes(key));
    if !item.contains_key(CREATED_AT) {
        item.insert(CREATED_AT.to_string(), timestamp(now));
    }
    item.insert(UPDATED_AT.to_string(), timestamp(now));
    item
}

/// Strips the native id from a read document.
pub fn strip_id(mut item: Item) -> Item {
    item.remove(DOCUMENT_ID);
    item
}

/// Sort specification on the composite key.
pub fn sort_spec(ascending: bool) -> Item {
    object(json!({ COMPOSITE_ATTRIBUTE: if ascending { 1 } else { -1 } }))
}
