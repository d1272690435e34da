//! In-memory key-value client.
//!
//! Evaluates the placeholder expressions the adapter compiles, so tests
//! exercise the real request building end to end.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use unistore::NativeError;
use unistore::backends::keyvalue::{
    BatchGetOutput, BatchGetRequest, DeleteItemRequest, ExpressionAttributes, GetItemRequest,
    ItemPage, KeyValueApi, PutItemRequest, QueryRequest, ScanRequest, StatementRequest,
    TransactWriteItem, TransactWriteRequest, UpdateItemRequest,
};
use unistore::core::BackendKind;
use unistore::types::{
    FilterCondition, FilterOperator, Item, KeyCondition, PARTITION_ATTRIBUTE, SORT_ATTRIBUTE,
    value,
};

use super::Faults;

type StoreKey = (String, String);

fn store_key(item: &Item) -> StoreKey {
    let part = |name: &str| item.get(name).map(Value::to_string).unwrap_or_default();
    (part(PARTITION_ATTRIBUTE), part(SORT_ATTRIBUTE))
}

fn key_attributes(item: &Item) -> Item {
    item.iter()
        .filter(|(k, _)| *k == PARTITION_ATTRIBUTE || *k == SORT_ATTRIBUTE)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn native_error(code: &str, message: &str) -> NativeError {
    NativeError::new(BackendKind::KeyValue, message).with_code(code)
}

/// In-memory table honoring conditions, updates, pagination and
/// transaction tokens.
#[derive(Debug)]
pub struct MockKeyValueClient {
    table: String,
    items: Mutex<BTreeMap<StoreKey, Item>>,
    /// Call counters and injected failures.
    pub faults: Faults,
    reachable: AtomicBool,
    unprocessed_rounds: AtomicU32,
    tokens: Mutex<HashSet<String>>,
    transactions: Mutex<Vec<TransactWriteRequest>>,
    statements: Mutex<Vec<StatementRequest>>,
    last_get: Mutex<Option<GetItemRequest>>,
    last_update: Mutex<Option<UpdateItemRequest>>,
    last_query: Mutex<Option<QueryRequest>>,
}

impl MockKeyValueClient {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            items: Mutex::new(BTreeMap::new()),
            faults: Faults::default(),
            reachable: AtomicBool::new(true),
            unprocessed_rounds: AtomicU32::new(0),
            tokens: Mutex::new(HashSet::new()),
            transactions: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            last_get: Mutex::new(None),
            last_update: Mutex::new(None),
            last_query: Mutex::new(None),
        }
    }

    /// Makes every call fail with a dispatch failure while false.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Leaves one key unprocessed in each of the next `rounds` batch reads.
    pub fn leave_unprocessed(&self, rounds: u32) {
        self.unprocessed_rounds.store(rounds, Ordering::SeqCst);
    }

    /// Stores an item directly, bypassing conditions.
    pub fn seed(&self, item: Item) {
        self.items.lock().insert(store_key(&item), item);
    }

    /// Returns the stored item with the given native key values.
    pub fn stored(&self, pk: impl Into<Value>, sk: impl Into<Value>) -> Option<Item> {
        let mut key = Item::new();
        key.insert(PARTITION_ATTRIBUTE.to_string(), pk.into());
        key.insert(SORT_ATTRIBUTE.to_string(), sk.into());
        self.items.lock().get(&store_key(&key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn transactions(&self) -> Vec<TransactWriteRequest> {
        self.transactions.lock().clone()
    }

    pub fn statements(&self) -> Vec<StatementRequest> {
        self.statements.lock().clone()
    }

    pub fn last_get(&self) -> Option<GetItemRequest> {
        self.last_get.lock().clone()
    }

    pub fn last_update(&self) -> Option<UpdateItemRequest> {
        self.last_update.lock().clone()
    }

    pub fn last_query(&self) -> Option<QueryRequest> {
        self.last_query.lock().clone()
    }

    fn enter(&self, operation: &str) -> Result<(), NativeError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(native_error("DispatchFailure", "connection refused"));
        }
        self.faults.enter(operation)
    }

    fn check_table(&self, table: &str) -> Result<(), NativeError> {
        if table != self.table {
            return Err(native_error(
                "ResourceNotFoundException",
                &format!("Requested resource not found: Table: {} not found", table),
            ));
        }
        Ok(())
    }

    fn paginate(
        &self,
        candidates: Vec<Item>,
        start: Option<&Item>,
        limit: Option<u32>,
        filter: Option<&str>,
        projection: Option<&str>,
        attributes: &ExpressionAttributes,
    ) -> ItemPage {
        let offset = start
            .and_then(|start| {
                let start = store_key(start);
                candidates.iter().position(|item| store_key(item) == start)
            })
            .map_or(0, |index| index + 1);
        let window = &candidates[offset.min(candidates.len())..];
        let evaluated = match limit {
            Some(limit) => &window[..window.len().min(limit as usize)],
            None => window,
        };
        let last_evaluated_key = (evaluated.len() < window.len())
            .then(|| evaluated.last().map(key_attributes))
            .flatten();

        let items = evaluated
            .iter()
            .filter(|item| filter.is_none_or(|f| evaluate(f, attributes, item)))
            .map(|item| project(item, projection, attributes))
            .collect();
        ItemPage {
            items,
            last_evaluated_key,
        }
    }
}

#[async_trait]
impl KeyValueApi for MockKeyValueClient {
    async fn describe_table(&self, table: &str) -> Result<(), NativeError> {
        self.enter("describe_table")?;
        self.check_table(table)
    }

    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>, NativeError> {
        self.enter("get_item")?;
        self.check_table(&request.table)?;
        *self.last_get.lock() = Some(request.clone());
        let found = self.items.lock().get(&store_key(&request.key)).cloned();
        Ok(found.map(|item| project(&item, request.projection.as_deref(), &request.attributes)))
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<(), NativeError> {
        self.enter("put_item")?;
        self.check_table(&request.table)?;
        let key = store_key(&request.item);
        let mut items = self.items.lock();
        let current = items.get(&key).cloned().unwrap_or_default();
        if let Some(condition) = &request.condition {
            if !evaluate(condition, &request.attributes, &current) {
                return Err(native_error(
                    "ConditionalCheckFailedException",
                    "The conditional request failed",
                ));
            }
        }
        items.insert(key, request.item);
        Ok(())
    }

    async fn update_item(&self, request: UpdateItemRequest) -> Result<Option<Item>, NativeError> {
        self.enter("update_item")?;
        self.check_table(&request.table)?;
        *self.last_update.lock() = Some(request.clone());
        let key = store_key(&request.key);
        let mut items = self.items.lock();
        let current = items.get(&key).cloned();
        if let Some(condition) = &request.condition {
            if !evaluate(condition, &request.attributes, &current.clone().unwrap_or_default()) {
                return Err(native_error(
                    "ConditionalCheckFailedException",
                    "The conditional request failed",
                ));
            }
        }
        let mut item = current.unwrap_or_else(|| request.key.clone());
        apply_update(&mut item, &request.update, &request.attributes)?;
        items.insert(key, item.clone());
        Ok(Some(item))
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), NativeError> {
        self.enter("delete_item")?;
        self.check_table(&request.table)?;
        let key = store_key(&request.key);
        let mut items = self.items.lock();
        if let Some(condition) = &request.condition {
            let current = items.get(&key).cloned().unwrap_or_default();
            if !evaluate(condition, &request.attributes, &current) {
                return Err(native_error(
                    "ConditionalCheckFailedException",
                    "The conditional request failed",
                ));
            }
        }
        items.remove(&key);
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<ItemPage, NativeError> {
        self.enter("query")?;
        self.check_table(&request.table)?;
        *self.last_query.lock() = Some(request.clone());

        let mut candidates: Vec<Item> = self
            .items
            .lock()
            .values()
            .filter(|item| evaluate(&request.key_condition, &request.attributes, item))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| compare_attr(a, b, SORT_ATTRIBUTE));
        if !request.scan_forward {
            candidates.reverse();
        }
        Ok(self.paginate(
            candidates,
            request.exclusive_start_key.as_ref(),
            request.limit,
            request.filter.as_deref(),
            request.projection.as_deref(),
            &request.attributes,
        ))
    }

    async fn scan(&self, request: ScanRequest) -> Result<ItemPage, NativeError> {
        self.enter("scan")?;
        self.check_table(&request.table)?;
        let candidates: Vec<Item> = self.items.lock().values().cloned().collect();
        Ok(self.paginate(
            candidates,
            request.exclusive_start_key.as_ref(),
            request.limit,
            request.filter.as_deref(),
            request.projection.as_deref(),
            &request.attributes,
        ))
    }

    async fn batch_get_item(
        &self,
        request: BatchGetRequest,
    ) -> Result<BatchGetOutput, NativeError> {
        self.enter("batch_get_item")?;
        self.check_table(&request.table)?;
        if request.keys.len() > 100 {
            return Err(native_error(
                "ValidationException",
                "Too many items requested for the BatchGetItem call",
            ));
        }

        let mut keys = request.keys;
        let mut unprocessed_keys = Vec::new();
        let rounds = self.unprocessed_rounds.load(Ordering::SeqCst);
        if rounds > 0 && !keys.is_empty() {
            self.unprocessed_rounds.store(rounds - 1, Ordering::SeqCst);
            unprocessed_keys.push(keys.remove(0));
        }

        let items = self.items.lock();
        let found = keys
            .iter()
            .filter_map(|key| items.get(&store_key(key)))
            .map(|item| project(item, request.projection.as_deref(), &request.attributes))
            .collect();
        Ok(BatchGetOutput {
            items: found,
            unprocessed_keys,
        })
    }

    async fn transact_write_items(&self, request: TransactWriteRequest) -> Result<(), NativeError> {
        self.enter("transact_write_items")?;
        if request.items.len() > 25 {
            return Err(native_error(
                "ValidationException",
                "Member must have length less than or equal to 25",
            ));
        }
        if !self.tokens.lock().insert(request.client_request_token.clone()) {
            // Replayed token: already applied.
            return Ok(());
        }
        self.transactions.lock().push(request.clone());

        let mut items = self.items.lock();
        let mut reasons = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let (key, condition, attributes) = match item {
                TransactWriteItem::Put(p) => {
                    (store_key(&p.item), p.condition.as_deref(), &p.attributes)
                }
                TransactWriteItem::Update(u) => {
                    (store_key(&u.key), u.condition.as_deref(), &u.attributes)
                }
                TransactWriteItem::Delete(d) => {
                    (store_key(&d.key), d.condition.as_deref(), &d.attributes)
                }
                TransactWriteItem::ConditionCheck(c) => {
                    (store_key(&c.key), Some(c.condition.as_str()), &c.attributes)
                }
            };
            let current = items.get(&key).cloned().unwrap_or_default();
            let passed = condition.is_none_or(|c| evaluate(c, attributes, &current));
            reasons.push(if passed { "None" } else { "ConditionalCheckFailed" });
        }
        if reasons.contains(&"ConditionalCheckFailed") {
            self.tokens.lock().remove(&request.client_request_token);
            return Err(native_error(
                "TransactionCanceledException",
                &format!(
                    "Transaction cancelled, please refer cancellation reasons for specific reasons [{}]",
                    reasons.join(", ")
                ),
            ));
        }

        for item in request.items {
            match item {
                TransactWriteItem::Put(p) => {
                    items.insert(store_key(&p.item), p.item);
                }
                TransactWriteItem::Update(u) => {
                    let key = store_key(&u.key);
                    let mut updated = items.get(&key).cloned().unwrap_or_else(|| u.key.clone());
                    apply_update(&mut updated, &u.update, &u.attributes)?;
                    items.insert(key, updated);
                }
                TransactWriteItem::Delete(d) => {
                    items.remove(&store_key(&d.key));
                }
                TransactWriteItem::ConditionCheck(_) => {}
            }
        }
        Ok(())
    }

    async fn execute_statement(&self, request: StatementRequest) -> Result<Vec<Item>, NativeError> {
        self.enter("execute_statement")?;
        self.statements.lock().push(request);
        Ok(self.items.lock().values().cloned().collect())
    }
}

fn compare_attr(a: &Item, b: &Item, field: &str) -> CmpOrdering {
    match (a.get(field), b.get(field)) {
        (Some(x), Some(y)) => value::compare(x, y).unwrap_or(CmpOrdering::Equal),
        (Some(_), None) => CmpOrdering::Greater,
        (None, Some(_)) => CmpOrdering::Less,
        (None, None) => CmpOrdering::Equal,
    }
}

fn name(attributes: &ExpressionAttributes, placeholder: &str) -> String {
    let placeholder = placeholder.trim();
    attributes
        .names
        .get(placeholder)
        .cloned()
        .unwrap_or_else(|| placeholder.to_string())
}

fn operand(attributes: &ExpressionAttributes, placeholder: &str) -> Value {
    attributes
        .values
        .get(placeholder.trim())
        .cloned()
        .unwrap_or(Value::Null)
}

fn project(item: &Item, projection: Option<&str>, attributes: &ExpressionAttributes) -> Item {
    let Some(projection) = projection else {
        return item.clone();
    };
    let fields: Vec<String> = projection.split(',').map(|p| name(attributes, p)).collect();
    item.iter()
        .filter(|(k, _)| fields.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Splits on commas outside parentheses.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn call_args<'a>(clause: &'a str, function: &str) -> Option<Vec<&'a str>> {
    let inner = clause
        .strip_prefix(function)?
        .strip_prefix('(')?
        .strip_suffix(')')?;
    Some(inner.split(',').map(str::trim).collect())
}

/// Evaluates a condition expression against an item.
pub fn evaluate(expression: &str, attributes: &ExpressionAttributes, item: &Item) -> bool {
    let mut clauses: Vec<String> = Vec::new();
    for part in expression.split(" AND ") {
        match clauses.last_mut() {
            Some(last) if last.contains(" BETWEEN ") && !last.contains(" AND ") => {
                last.push_str(" AND ");
                last.push_str(part);
            }
            _ => clauses.push(part.to_string()),
        }
    }
    clauses
        .iter()
        .all(|clause| evaluate_clause(clause.trim(), attributes, item))
}

fn evaluate_clause(clause: &str, attributes: &ExpressionAttributes, item: &Item) -> bool {
    if let Some(args) = call_args(clause, "attribute_exists") {
        return FilterCondition::exists(name(attributes, args[0])).matches(item);
    }
    if let Some(args) = call_args(clause, "attribute_not_exists") {
        return FilterCondition::not_exists(name(attributes, args[0])).matches(item);
    }
    if let Some(args) = call_args(clause, "contains") {
        return FilterCondition::contains(name(attributes, args[0]), operand(attributes, args[1]))
            .matches(item);
    }
    if let Some(args) = call_args(clause, "begins_with") {
        return KeyCondition::begins_with(name(attributes, args[0]), operand(attributes, args[1]))
            .matches(item);
    }
    if let Some((field, range)) = clause.split_once(" BETWEEN ") {
        let Some((low, high)) = range.split_once(" AND ") else {
            return false;
        };
        return KeyCondition::between(
            name(attributes, field),
            operand(attributes, low),
            operand(attributes, high),
        )
        .matches(item);
    }
    if let Some((field, list)) = clause.split_once(" IN ") {
        let values = list
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(|p| operand(attributes, p))
            .collect();
        return FilterCondition::is_in(name(attributes, field), values).matches(item);
    }

    let mut parts = clause.splitn(3, ' ');
    let (Some(field), Some(op), Some(placeholder)) = (parts.next(), parts.next(), parts.next())
    else {
        panic!("unsupported condition clause: {}", clause);
    };
    let operator = match op {
        "=" => FilterOperator::Eq,
        "<>" => FilterOperator::Ne,
        "<" => FilterOperator::Lt,
        "<=" => FilterOperator::Le,
        ">" => FilterOperator::Gt,
        ">=" => FilterOperator::Ge,
        other => panic!("unsupported comparison operator: {}", other),
    };
    FilterCondition::new(name(attributes, field), operator, operand(attributes, placeholder))
        .matches(item)
}

fn find_keyword(expression: &str, keyword: &str) -> Option<usize> {
    if expression.starts_with(&format!("{} ", keyword)) {
        return Some(0);
    }
    expression.find(&format!(" {} ", keyword)).map(|p| p + 1)
}

/// Applies an update expression to an item.
pub fn apply_update(
    item: &mut Item,
    expression: &str,
    attributes: &ExpressionAttributes,
) -> Result<(), NativeError> {
    let mut starts: Vec<(usize, &str)> = ["SET", "ADD", "REMOVE", "DELETE"]
        .into_iter()
        .filter_map(|kw| find_keyword(expression, kw).map(|p| (p, kw)))
        .collect();
    starts.sort();

    for (i, (pos, keyword)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(expression.len(), |(p, _)| *p);
        let body = &expression[pos + keyword.len()..end];
        for action in split_top_level(body) {
            match *keyword {
                "SET" => {
                    let Some((target, rhs)) = action.split_once(" = ") else {
                        return Err(native_error("ValidationException", "malformed SET action"));
                    };
                    let field = name(attributes, target);
                    if let Some(inner) = rhs
                        .strip_prefix("list_append(")
                        .and_then(|r| r.strip_suffix(')'))
                    {
                        let args = split_top_level(inner);
                        let appended = operand(attributes, &args[1]);
                        let mut list = match item.get(&field) {
                            Some(Value::Array(existing)) => existing.clone(),
                            _ => Vec::new(),
                        };
                        if let Value::Array(values) = appended {
                            list.extend(values);
                        }
                        item.insert(field, Value::Array(list));
                    } else {
                        item.insert(field, operand(attributes, rhs));
                    }
                }
                "ADD" => {
                    let mut parts = action.split_whitespace();
                    let (Some(target), Some(placeholder)) = (parts.next(), parts.next()) else {
                        return Err(native_error("ValidationException", "malformed ADD action"));
                    };
                    let field = name(attributes, target);
                    let delta = operand(attributes, placeholder);
                    let sum = match (item.get(&field), &delta) {
                        (Some(Value::Number(current)), Value::Number(step)) => {
                            value::add_numbers(current, step).map(Value::Number).ok_or_else(
                                || native_error("ValidationException", "numeric overflow"),
                            )?
                        }
                        (None, _) => delta.clone(),
                        _ => {
                            return Err(native_error(
                                "ValidationException",
                                "An operand in the update expression has an incorrect data type",
                            ));
                        }
                    };
                    item.insert(field, sum);
                }
                "REMOVE" => {
                    item.remove(&name(attributes, &action));
                }
                "DELETE" => {
                    let mut parts = action.split_whitespace();
                    let (Some(target), Some(placeholder)) = (parts.next(), parts.next()) else {
                        return Err(native_error("ValidationException", "malformed DELETE action"));
                    };
                    // Stored arrays are lists; the service only deletes from sets.
                    let field = name(attributes, target);
                    if matches!(item.get(&field), Some(Value::Array(_))) {
                        return Err(native_error(
                            "ValidationException",
                            "An operand in the update expression has an incorrect data type",
                        ));
                    }
                    let _ = operand(attributes, placeholder);
                }
                _ => unreachable!(),
            }
        }
    }
    Ok(())
}
