//! In-memory document client.
//!
//! Evaluates the query and update operators the adapter emits and enforces
//! uniqueness of the composite key attribute, like the unique index the
//! adapter creates on connect.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::RegexBuilder;
use serde_json::{Value, json};

use unistore::NativeError;
use unistore::backends::document::{
    COMPOSITE_ATTRIBUTE, DOCUMENT_ID, DocumentApi, DocumentSession, FindOptions,
};
use unistore::core::BackendKind;
use unistore::types::{Item, value};

use super::Faults;

type Collections = HashMap<String, Vec<Item>>;

fn native_error(numeric_code: i32, code: &str, message: &str) -> NativeError {
    NativeError::new(BackendKind::Document, message)
        .with_code(code)
        .with_numeric_code(numeric_code)
}

fn duplicate_key(composite: &Value) -> NativeError {
    native_error(
        11000,
        "DuplicateKey",
        &format!("E11000 duplicate key error dup key: {{ pksk: {} }}", composite),
    )
}

#[derive(Debug, Default)]
struct State {
    collections: Collections,
    indexes: Vec<(String, String)>,
    commands: Vec<Item>,
}

/// In-memory database shared by the client and its sessions.
#[derive(Debug, Clone)]
pub struct MockDocumentClient {
    state: Arc<Mutex<State>>,
    /// Call counters and injected failures.
    pub faults: Arc<Faults>,
    reachable: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl Default for MockDocumentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDocumentClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            faults: Arc::new(Faults::default()),
            reachable: Arc::new(AtomicBool::new(true)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Makes every call fail with a server selection error while false.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns the documents in a collection.
    pub fn documents(&self, collection: &str) -> Vec<Item> {
        self.state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the document with the given composite key, in any collection.
    pub fn by_composite(&self, composite: &str) -> Option<(String, Item)> {
        let state = self.state.lock();
        state.collections.iter().find_map(|(name, docs)| {
            docs.iter()
                .find(|d| d.get(COMPOSITE_ATTRIBUTE) == Some(&json!(composite)))
                .map(|d| (name.clone(), d.clone()))
        })
    }

    /// Stores a document directly.
    pub fn seed(&self, collection: &str, document: Item) {
        let document = self.with_id(document);
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Returns the `(collection, field)` pairs of created unique indexes.
    pub fn indexes(&self) -> Vec<(String, String)> {
        self.state.lock().indexes.clone()
    }

    /// Returns the commands passed to `run_command`.
    pub fn commands(&self) -> Vec<Item> {
        self.state.lock().commands.clone()
    }

    fn enter(&self, operation: &str) -> Result<(), NativeError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(NativeError::new(BackendKind::Document, "server selection timeout")
                .with_code("ServerSelection"));
        }
        self.faults.enter(operation)
    }

    fn with_id(&self, mut document: Item) -> Item {
        if !document.contains_key(DOCUMENT_ID) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            document.insert(DOCUMENT_ID.to_string(), json!(format!("oid-{}", id)));
        }
        document
    }
}

#[async_trait]
impl DocumentApi for MockDocumentClient {
    async fn ping(&self) -> Result<(), NativeError> {
        self.enter("ping")
    }

    async fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), NativeError> {
        self.enter("create_unique_index")?;
        let mut state = self.state.lock();
        let index = (collection.to_string(), field.to_string());
        if !state.indexes.contains(&index) {
            state.indexes.push(index);
        }
        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Item,
        projection: Option<Item>,
    ) -> Result<Option<Item>, NativeError> {
        self.enter("find_one")?;
        let state = self.state.lock();
        let found = state
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches_filter(d, &filter)))
            .map(|d| project(d, projection.as_ref()));
        Ok(found)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Item,
        options: FindOptions,
    ) -> Result<Vec<Item>, NativeError> {
        self.enter("find")?;
        let state = self.state.lock();
        Ok(find_in(&state.collections, collection, &filter, &options))
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Item,
        replacement: Item,
        upsert: bool,
    ) -> Result<u64, NativeError> {
        self.enter("replace_one")?;
        let replacement = self.with_id(replacement);
        replace_in(&mut self.state.lock().collections, collection, &filter, replacement, upsert)
    }

    async fn insert_one(&self, collection: &str, document: Item) -> Result<(), NativeError> {
        self.enter("insert_one")?;
        let document = self.with_id(document);
        insert_in(&mut self.state.lock().collections, collection, document)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Item,
        update: Item,
        upsert: bool,
    ) -> Result<Option<Item>, NativeError> {
        self.enter("find_one_and_update")?;
        let seed = self.with_id(Item::new());
        update_in(
            &mut self.state.lock().collections,
            collection,
            &filter,
            &update,
            upsert,
            seed,
        )
    }

    async fn delete_one(&self, collection: &str, filter: Item) -> Result<u64, NativeError> {
        self.enter("delete_one")?;
        Ok(delete_in(&mut self.state.lock().collections, collection, &filter))
    }

    async fn run_command(&self, command: Item) -> Result<Item, NativeError> {
        self.enter("run_command")?;
        self.state.lock().commands.push(command.clone());
        let mut reply = Item::new();
        reply.insert("ok".to_string(), json!(1));
        if !command.contains_key("ping") {
            reply.insert("command".to_string(), Value::Object(command));
        }
        Ok(reply)
    }

    async fn start_session(&self) -> Result<Box<dyn DocumentSession>, NativeError> {
        self.enter("start_session")?;
        Ok(Box::new(MockSession {
            client: self.clone(),
            working: None,
        }))
    }
}

/// A session whose transaction works on a copy of the database and swaps
/// it in on commit.
#[derive(Debug)]
pub struct MockSession {
    client: MockDocumentClient,
    working: Option<Collections>,
}

impl MockSession {
    fn working(&mut self) -> Result<&mut Collections, NativeError> {
        self.working.as_mut().ok_or_else(|| {
            native_error(251, "NoSuchTransaction", "Transaction has not been started")
        })
    }
}

#[async_trait]
impl DocumentSession for MockSession {
    async fn start_transaction(&mut self) -> Result<(), NativeError> {
        self.client.enter("start_transaction")?;
        self.working = Some(self.client.state.lock().collections.clone());
        Ok(())
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        filter: Item,
        replacement: Item,
        upsert: bool,
    ) -> Result<u64, NativeError> {
        self.client.enter("session_replace_one")?;
        let replacement = self.client.with_id(replacement);
        replace_in(self.working()?, collection, &filter, replacement, upsert)
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: Item,
        update: Item,
        upsert: bool,
    ) -> Result<u64, NativeError> {
        self.client.enter("session_update_one")?;
        let seed = self.client.with_id(Item::new());
        let matched = self
            .working()?
            .get(collection)
            .is_some_and(|docs| docs.iter().any(|d| matches_filter(d, &filter)));
        update_in(self.working()?, collection, &filter, &update, upsert, seed)?;
        Ok(u64::from(matched))
    }

    async fn delete_one(&mut self, collection: &str, filter: Item) -> Result<u64, NativeError> {
        self.client.enter("session_delete_one")?;
        Ok(delete_in(self.working()?, collection, &filter))
    }

    async fn find_one(
        &mut self,
        collection: &str,
        filter: Item,
    ) -> Result<Option<Item>, NativeError> {
        self.client.enter("session_find_one")?;
        Ok(self
            .working()?
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches_filter(d, &filter)))
            .cloned())
    }

    async fn commit_transaction(&mut self) -> Result<(), NativeError> {
        self.client.enter("commit_transaction")?;
        let working = self.working.take().ok_or_else(|| {
            native_error(251, "NoSuchTransaction", "Transaction has not been started")
        })?;
        self.client.state.lock().collections = working;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), NativeError> {
        self.client.enter("abort_transaction")?;
        self.working = None;
        Ok(())
    }
}

fn composite_taken(docs: &[Item], document: &Item, except: Option<usize>) -> bool {
    let Some(composite) = document.get(COMPOSITE_ATTRIBUTE) else {
        return false;
    };
    docs.iter()
        .enumerate()
        .any(|(i, d)| Some(i) != except && d.get(COMPOSITE_ATTRIBUTE) == Some(composite))
}

fn insert_in(
    collections: &mut Collections,
    collection: &str,
    document: Item,
) -> Result<(), NativeError> {
    let docs = collections.entry(collection.to_string()).or_default();
    if composite_taken(docs, &document, None) {
        return Err(duplicate_key(&document[COMPOSITE_ATTRIBUTE]));
    }
    docs.push(document);
    Ok(())
}

fn replace_in(
    collections: &mut Collections,
    collection: &str,
    filter: &Item,
    mut replacement: Item,
    upsert: bool,
) -> Result<u64, NativeError> {
    let docs = collections.entry(collection.to_string()).or_default();
    match docs.iter().position(|d| matches_filter(d, filter)) {
        Some(index) => {
            if composite_taken(docs, &replacement, Some(index)) {
                return Err(duplicate_key(&replacement[COMPOSITE_ATTRIBUTE]));
            }
            if let Some(id) = docs[index].get(DOCUMENT_ID).cloned() {
                replacement.insert(DOCUMENT_ID.to_string(), id);
            }
            docs[index] = replacement;
            Ok(1)
        }
        None if upsert => {
            insert_in(collections, collection, replacement)?;
            Ok(0)
        }
        None => Ok(0),
    }
}

fn update_in(
    collections: &mut Collections,
    collection: &str,
    filter: &Item,
    update: &Item,
    upsert: bool,
    seed: Item,
) -> Result<Option<Item>, NativeError> {
    let docs = collections.entry(collection.to_string()).or_default();
    if let Some(index) = docs.iter().position(|d| matches_filter(d, filter)) {
        let mut document = docs[index].clone();
        apply_update(&mut document, update, false)?;
        docs[index] = document.clone();
        return Ok(Some(document));
    }
    if !upsert {
        return Ok(None);
    }
    let mut document = seed;
    for (field, condition) in filter {
        if field.starts_with('$') {
            continue;
        }
        match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                if let Some(eq) = ops.get("$eq") {
                    document.insert(field.clone(), eq.clone());
                }
            }
            other => {
                document.insert(field.clone(), other.clone());
            }
        }
    }
    apply_update(&mut document, update, true)?;
    insert_in(collections, collection, document.clone())?;
    Ok(Some(document))
}

fn delete_in(collections: &mut Collections, collection: &str, filter: &Item) -> u64 {
    let Some(docs) = collections.get_mut(collection) else {
        return 0;
    };
    match docs.iter().position(|d| matches_filter(d, filter)) {
        Some(index) => {
            docs.remove(index);
            1
        }
        None => 0,
    }
}

fn find_in(collections: &Collections, collection: &str, filter: &Item, options: &FindOptions) -> Vec<Item> {
    let mut found: Vec<Item> = collections
        .get(collection)
        .map(|docs| {
            docs.iter()
                .filter(|d| matches_filter(d, filter))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if let Some(sort) = &options.sort {
        found.sort_by(|a, b| {
            for (field, direction) in sort {
                let ordering = compare_field(a, b, field);
                let ordering = if direction.as_i64() == Some(-1) {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != CmpOrdering::Equal {
                    return ordering;
                }
            }
            CmpOrdering::Equal
        });
    }

    let skip = options.skip.unwrap_or(0) as usize;
    let limit = match options.limit {
        Some(limit) if limit > 0 => limit as usize,
        _ => usize::MAX,
    };
    found
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|d| project(&d, options.projection.as_ref()))
        .collect()
}

fn compare_field(a: &Item, b: &Item, field: &str) -> CmpOrdering {
    match (a.get(field), b.get(field)) {
        (Some(x), Some(y)) => value::compare(x, y).unwrap_or(CmpOrdering::Equal),
        (Some(_), None) => CmpOrdering::Greater,
        (None, Some(_)) => CmpOrdering::Less,
        (None, None) => CmpOrdering::Equal,
    }
}

fn project(document: &Item, projection: Option<&Item>) -> Item {
    let Some(projection) = projection else {
        return document.clone();
    };
    document
        .iter()
        .filter(|(k, _)| *k == DOCUMENT_ID || projection.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Evaluates a query filter against a document.
pub fn matches_filter(document: &Item, filter: &Item) -> bool {
    filter.iter().all(|(field, condition)| match field.as_str() {
        "$and" => clauses(condition).iter().all(|c| matches_filter(document, c)),
        "$or" => clauses(condition).iter().any(|c| matches_filter(document, c)),
        _ => matches_field(document.get(field), condition),
    })
}

fn clauses(value: &Value) -> Vec<Item> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default()
}

fn equals_or_contains(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| value::equals(item, expected))
        }
        Some(actual) => value::equals(actual, expected),
        None => expected.is_null(),
    }
}

fn matches_field(actual: Option<&Value>, condition: &Value) -> bool {
    let Value::Object(ops) = condition else {
        return equals_or_contains(actual, condition);
    };
    if !ops.keys().any(|k| k.starts_with('$')) {
        return equals_or_contains(actual, condition);
    }
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => equals_or_contains(actual, operand),
        "$ne" => !equals_or_contains(actual, operand),
        "$lt" | "$lte" | "$gt" | "$gte" => {
            let Some(ordering) = actual.and_then(|a| value::compare(a, operand)) else {
                return false;
            };
            match op.as_str() {
                "$lt" => ordering == CmpOrdering::Less,
                "$lte" => ordering != CmpOrdering::Greater,
                "$gt" => ordering == CmpOrdering::Greater,
                _ => ordering != CmpOrdering::Less,
            }
        }
        "$in" => operand
            .as_array()
            .is_some_and(|values| values.iter().any(|v| equals_or_contains(actual, v))),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        "$regex" => {
            let case_insensitive = ops
                .get("$options")
                .and_then(Value::as_str)
                .is_some_and(|o| o.contains('i'));
            let Some(pattern) = operand.as_str() else {
                return false;
            };
            let Ok(regex) = RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
            else {
                return false;
            };
            actual
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_match(text))
        }
        "$options" => true,
        "$elemMatch" => match actual {
            Some(Value::Array(items)) => items.iter().any(|item| {
                operand
                    .as_object()
                    .is_some_and(|inner| matches_field(Some(item), &Value::Object(inner.clone())))
            }),
            _ => false,
        },
        other => panic!("unsupported query operator: {}", other),
    })
}

/// Applies update operators to a document.
pub fn apply_update(document: &mut Item, update: &Item, inserting: bool) -> Result<(), NativeError> {
    for (op, fields) in update {
        let Some(fields) = fields.as_object() else {
            return Err(native_error(9, "FailedToParse", "update operator must be a document"));
        };
        match op.as_str() {
            "$set" => {
                for (field, v) in fields {
                    document.insert(field.clone(), v.clone());
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (field, v) in fields {
                        document.insert(field.clone(), v.clone());
                    }
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    document.remove(field);
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let sum = match (document.get(field), delta) {
                        (Some(Value::Number(current)), Value::Number(step)) => {
                            value::add_numbers(current, step).map(Value::Number)
                        }
                        (None, Value::Number(_)) => Some(delta.clone()),
                        _ => None,
                    };
                    let Some(sum) = sum else {
                        return Err(native_error(
                            14,
                            "TypeMismatch",
                            &format!("Cannot apply $inc to a non-numeric value at {}", field),
                        ));
                    };
                    document.insert(field.clone(), sum);
                }
            }
            "$push" => {
                for (field, spec) in fields {
                    let values = spec
                        .get("$each")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_else(|| vec![spec.clone()]);
                    match document.get_mut(field) {
                        Some(Value::Array(existing)) => existing.extend(values),
                        Some(_) => {
                            return Err(native_error(
                                2,
                                "BadValue",
                                &format!("The field '{}' must be an array", field),
                            ));
                        }
                        None => {
                            document.insert(field.clone(), Value::Array(values));
                        }
                    }
                }
            }
            "$pullAll" => {
                for (field, removed) in fields {
                    let Some(removed) = removed.as_array() else {
                        continue;
                    };
                    if let Some(Value::Array(existing)) = document.get_mut(field) {
                        existing.retain(|v| !removed.iter().any(|r| value::equals(v, r)));
                    }
                }
            }
            other => {
                return Err(native_error(
                    9,
                    "FailedToParse",
                    &format!("Unknown modifier: {}", other),
                ));
            }
        }
    }
    Ok(())
}
