//! [`DataProvider`] implementation for the key-value backend.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{
    BatchGetRequest, ConditionCheckRequest, DeleteItemRequest, GetItemRequest, KeyValueApi,
    PutItemRequest, QueryRequest, ScanRequest, StatementRequest, TransactWriteItem,
    TransactWriteRequest, UpdateItemRequest,
};
use super::config::KeyValueConfig;
use super::expression::{ExpressionBuilder, and_all};
use super::transaction::KeyValueTransaction;
use crate::backends::AdapterSettings;
use crate::core::{
    BackendCapability, BackendKind, ConnectionEvent, ConnectionManager, ConnectionProbe,
    DataProvider, MetricsCollector, NativeTransaction, Resilience, TransactionOptions,
};
use crate::error::{DataError, DataResult, ErrorKind, NativeError};
use crate::translator::TranslatorRegistry;
use crate::types::{
    BatchGetOptions, CursorPosition, DatabaseKey, DeleteOptions, FilterCondition, GetOptions,
    HealthStatus, Item, NativeCommand, PARTITION_ATTRIBUTE, Page, PageCursor, PutOptions,
    QueryInput, SORT_ATTRIBUTE, ScanInput, SortOrder, TransactionOperation, UpdateInput,
    normalize_item_key,
};

/// Maximum operations in one native multi-item commit.
pub const MAX_TRANSACTION_ITEMS: usize = 25;

/// Maximum keys in one native batch read.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Attempts for an update whose list removals raced a concurrent write.
const LIST_REMOVAL_ATTEMPTS: u32 = 5;

/// Table-scoped request building and native call execution.
///
/// Shared by the adapter and its native transactions.
#[derive(Debug, Clone)]
pub(crate) struct TableContext {
    pub(crate) client: Arc<dyn KeyValueApi>,
    pub(crate) table: String,
    pub(crate) mirror_partition_key: bool,
    pub(crate) translators: Arc<TranslatorRegistry>,
    pub(crate) resilience: Resilience,
}

impl TableContext {
    /// Runs a native call under the retry policy, translating its error.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> DataResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NativeError>>,
    {
        self.resilience
            .run(operation, || {
                let fut = f();
                async move { fut.await.map_err(|e| self.translators.translate(e)) }
            })
            .await
    }

    pub(crate) fn native_key(&self, key: &DatabaseKey) -> Item {
        let mut native = Item::new();
        native.insert(PARTITION_ATTRIBUTE.to_string(), key.primary.to_json());
        match &key.sort {
            Some(sort) => {
                native.insert(SORT_ATTRIBUTE.to_string(), sort.to_json());
            }
            None if self.mirror_partition_key => {
                native.insert(SORT_ATTRIBUTE.to_string(), key.primary.to_json());
            }
            None => {}
        }
        native
    }

    /// Normalizes key aliases and applies sort-key mirroring.
    pub(crate) fn prepare_item(&self, mut item: Item) -> DataResult<Item> {
        let key = normalize_item_key(&mut item)?;
        if key.sort.is_none() && self.mirror_partition_key {
            item.insert(SORT_ATTRIBUTE.to_string(), key.primary.to_json());
        }
        Ok(item)
    }

    pub(crate) fn put_request(&self, item: Item, options: &PutOptions) -> DataResult<PutItemRequest> {
        options.validate()?;
        let item = self.prepare_item(item)?;
        let mut builder = ExpressionBuilder::new();
        let mut clauses = Vec::new();
        if options.if_not_exists {
            clauses.push(builder.filter(&FilterCondition::not_exists(PARTITION_ATTRIBUTE))?);
        }
        if let Some(condition) = &options.condition {
            clauses.push(builder.filter(condition)?);
        }
        Ok(PutItemRequest {
            table: self.table.clone(),
            item,
            condition: and_all(clauses),
            attributes: builder.finish(),
        })
    }

    /// Builds an update. List removals are resolved against `current`.
    pub(crate) fn update_request(
        &self,
        input: &UpdateInput,
        current: Option<&Item>,
    ) -> DataResult<UpdateItemRequest> {
        let mut builder = ExpressionBuilder::new();
        let compiled = builder.update(input, current)?;
        let mut clauses = Vec::new();
        if let Some(condition) = &input.condition {
            clauses.push(builder.filter(condition)?);
        }
        clauses.extend(compiled.guards);
        Ok(UpdateItemRequest {
            table: self.table.clone(),
            key: self.native_key(&input.key),
            update: compiled.expression,
            condition: and_all(clauses),
            attributes: builder.finish(),
        })
    }

    /// Reads the stored item with a consistent read.
    pub(crate) async fn read_current(&self, key: &DatabaseKey) -> DataResult<Option<Item>> {
        let request = GetItemRequest {
            table: self.table.clone(),
            key: self.native_key(key),
            consistent_read: true,
            projection: None,
            attributes: Default::default(),
        };
        self.call("get", || self.client.get_item(request.clone()))
            .await
    }

    pub(crate) fn delete_request(
        &self,
        key: &DatabaseKey,
        condition: Option<&FilterCondition>,
    ) -> DataResult<DeleteItemRequest> {
        key.validate()?;
        let mut builder = ExpressionBuilder::new();
        let condition = condition.map(|c| builder.filter(c)).transpose()?;
        Ok(DeleteItemRequest {
            table: self.table.clone(),
            key: self.native_key(key),
            condition,
            attributes: builder.finish(),
        })
    }

    async fn transact_item(&self, operation: &TransactionOperation) -> DataResult<TransactWriteItem> {
        Ok(match operation {
            TransactionOperation::Put { item } => {
                TransactWriteItem::Put(self.put_request(item.clone(), &PutOptions::default())?)
            }
            TransactionOperation::Update(input) if input.remove.is_empty() => {
                TransactWriteItem::Update(self.update_request(input, None)?)
            }
            TransactionOperation::Update(input) => {
                input.validate()?;
                let current = self.read_current(&input.key).await?;
                let request = self.update_request(input, current.as_ref())?;
                if request.update.is_empty() {
                    // Nothing left to write; keep the guards as a check.
                    TransactWriteItem::ConditionCheck(ConditionCheckRequest {
                        table: request.table,
                        key: request.key,
                        condition: request.condition.unwrap_or_default(),
                        attributes: request.attributes,
                    })
                } else {
                    TransactWriteItem::Update(request)
                }
            }
            TransactionOperation::Delete { key } => {
                TransactWriteItem::Delete(self.delete_request(key, None)?)
            }
            TransactionOperation::ConditionCheck { key, condition } => {
                key.validate()?;
                let mut builder = ExpressionBuilder::new();
                let condition = builder.filter(condition)?;
                TransactWriteItem::ConditionCheck(ConditionCheckRequest {
                    table: self.table.clone(),
                    key: self.native_key(key),
                    condition,
                    attributes: builder.finish(),
                })
            }
        })
    }

    /// Rejects a multi-item commit above the native bound.
    pub(crate) fn check_transaction_bound(&self, operations: usize) -> DataResult<()> {
        if operations > MAX_TRANSACTION_ITEMS {
            return Err(DataError::validation(format!(
                "a transaction may contain at most {} operations, got {}",
                MAX_TRANSACTION_ITEMS, operations
            ))
            .with_backend(BackendKind::KeyValue));
        }
        Ok(())
    }

    /// Builds a multi-item commit. Updates removing list values read their
    /// item first; a concurrent change to those lists cancels the commit.
    pub(crate) async fn transact_request(
        &self,
        operations: &[TransactionOperation],
        token: &str,
    ) -> DataResult<TransactWriteRequest> {
        self.check_transaction_bound(operations.len())?;
        let mut items = Vec::with_capacity(operations.len());
        for operation in operations {
            items.push(self.transact_item(operation).await?);
        }
        Ok(TransactWriteRequest {
            items,
            client_request_token: token.to_string(),
        })
    }

    pub(crate) async fn transact(&self, request: TransactWriteRequest) -> DataResult<()> {
        if request.items.is_empty() {
            return Ok(());
        }
        self.call("transaction", || {
            self.client.transact_write_items(request.clone())
        })
        .await
    }
}

#[derive(Debug)]
struct TableProbe {
    client: Arc<dyn KeyValueApi>,
    table: String,
}

#[async_trait]
impl ConnectionProbe for TableProbe {
    async fn probe(&self) -> Result<(), NativeError> {
        self.client.describe_table(&self.table).await
    }
}

/// Key-value adapter.
///
/// Items are stored with `pk`/`sk` attributes in a single table.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use unistore::backends::keyvalue::{AwsDynamoClient, KeyValueConfig, KeyValueStore};
///
/// let config = KeyValueConfig::new("app-items");
/// let sdk = AwsDynamoClient::load_sdk_config(Some(&config.region)).await;
/// let client = Arc::new(AwsDynamoClient::from_sdk_config(&sdk, None));
/// let store = KeyValueStore::new(config, client);
/// store.connect().await?;
/// ```
#[derive(Debug)]
pub struct KeyValueStore {
    config: KeyValueConfig,
    ctx: TableContext,
    connection: ConnectionManager,
    metrics: Arc<MetricsCollector>,
}

impl KeyValueStore {
    /// Creates an adapter with default settings.
    pub fn new(config: KeyValueConfig, client: Arc<dyn KeyValueApi>) -> Self {
        Self::with_settings(config, client, AdapterSettings::default())
    }

    /// Creates an adapter with explicit translators, retry and metrics settings.
    pub fn with_settings(
        config: KeyValueConfig,
        client: Arc<dyn KeyValueApi>,
        settings: AdapterSettings,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new(settings.metrics));
        let resilience = Resilience::new(settings.retry);
        let probe = Arc::new(TableProbe {
            client: client.clone(),
            table: config.table_name.clone(),
        });
        let connection = ConnectionManager::new(
            BackendKind::KeyValue,
            probe,
            settings.translators.clone(),
            metrics.clone(),
            resilience.clone(),
            config.max_reconnect_attempts,
        );
        let ctx = TableContext {
            client,
            table: config.table_name.clone(),
            mirror_partition_key: config.mirror_partition_key,
            translators: settings.translators,
            resilience,
        };
        Self {
            config,
            ctx,
            connection,
            metrics,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &KeyValueConfig {
        &self.config
    }

    /// Returns the connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Disconnects and connects again.
    pub async fn reconnect(&self) -> DataResult<()> {
        self.connection.reconnect().await
    }

    /// Gives typed access to the native client.
    pub fn with_client<R>(&self, f: impl FnOnce(&dyn KeyValueApi) -> R) -> R {
        f(self.ctx.client.as_ref())
    }

    fn consistent(&self, requested: bool) -> bool {
        requested || self.config.consistent_read
    }

    async fn get_inner(&self, key: &DatabaseKey, options: &GetOptions) -> DataResult<Option<Item>> {
        key.validate()?;
        self.connection.ensure_connected()?;

        let mut builder = ExpressionBuilder::new();
        let projection = builder.projection(&options.projection);
        let request = GetItemRequest {
            table: self.ctx.table.clone(),
            key: self.ctx.native_key(key),
            consistent_read: self.consistent(options.consistent_read),
            projection,
            attributes: builder.finish(),
        };
        self.ctx
            .call("get", || self.ctx.client.get_item(request.clone()))
            .await
    }

    async fn put_inner(&self, item: Item, options: &PutOptions) -> DataResult<Item> {
        let request = self.ctx.put_request(item, options)?;
        self.connection.ensure_connected()?;
        self.ctx
            .call("put", || self.ctx.client.put_item(request.clone()))
            .await?;
        Ok(request.item)
    }

    async fn update_inner(&self, input: &UpdateInput) -> DataResult<Option<Item>> {
        if input.remove.is_empty() {
            let request = self.ctx.update_request(input, None)?;
            self.connection.ensure_connected()?;
            return self
                .ctx
                .call("update", || self.ctx.client.update_item(request.clone()))
                .await;
        }

        input.validate()?;
        self.connection.ensure_connected()?;
        let mut attempt = 1;
        loop {
            let current = self.ctx.read_current(&input.key).await?;
            let unmet = input.condition.as_ref().is_some_and(|condition| {
                !condition.matches(current.as_ref().unwrap_or(&Item::new()))
            });
            // Later attempts follow a failed guard; the condition itself may be what failed.
            if attempt > 1 && unmet {
                return Err(unmet_condition(&input.key));
            }

            let request = self.ctx.update_request(input, current.as_ref())?;
            if request.update.is_empty() {
                return if unmet {
                    Err(unmet_condition(&input.key))
                } else {
                    Ok(current)
                };
            }
            let result = self
                .ctx
                .call("update", || self.ctx.client.update_item(request.clone()))
                .await;
            match result {
                Err(e)
                    if e.kind() == ErrorKind::ConditionalCheckFailed
                        && attempt < LIST_REMOVAL_ATTEMPTS =>
                {
                    debug!(
                        backend = %BackendKind::KeyValue,
                        key = %input.key,
                        attempt,
                        "List changed during removal, re-reading"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn delete_inner(&self, key: &DatabaseKey, options: &DeleteOptions) -> DataResult<()> {
        options.validate()?;
        let request = self.ctx.delete_request(key, options.condition.as_ref())?;
        self.connection.ensure_connected()?;
        self.ctx
            .call("delete", || self.ctx.client.delete_item(request.clone()))
            .await
    }

    fn query_request(&self, input: &QueryInput) -> DataResult<QueryRequest> {
        input.validate()?;
        let key_condition = input.key_condition.as_ref().ok_or_else(|| {
            DataError::validation("a key-value query requires a key condition")
                .with_backend(BackendKind::KeyValue)
        })?;

        let mut builder = ExpressionBuilder::new();
        let key_condition = builder.key_condition(key_condition)?;
        let filter = input.filter.as_ref().map(|f| builder.filter(f)).transpose()?;
        let projection = builder.projection(&input.projection);
        Ok(QueryRequest {
            table: self.ctx.table.clone(),
            index_name: input.index_name.clone(),
            key_condition,
            filter,
            projection,
            attributes: builder.finish(),
            limit: input.limit,
            scan_forward: input.sort_order == SortOrder::Asc,
            consistent_read: self.config.consistent_read && input.index_name.is_none(),
            exclusive_start_key: decode_key_cursor(input.cursor.as_deref())?,
        })
    }

    async fn query_page_inner(&self, input: &QueryInput) -> DataResult<Page> {
        let request = self.query_request(input)?;
        self.connection.ensure_connected()?;
        let page = self
            .ctx
            .call("query", || self.ctx.client.query(request.clone()))
            .await?;
        Ok(Page::new(
            page.items,
            page.last_evaluated_key.map(|key| PageCursor::key(key).encode()),
        ))
    }

    async fn query_inner(&self, input: &QueryInput) -> DataResult<Vec<Item>> {
        let mut request = self.query_request(input)?;
        self.connection.ensure_connected()?;

        if request.limit.is_some() {
            let page = self
                .ctx
                .call("query", || self.ctx.client.query(request.clone()))
                .await?;
            return Ok(page.items);
        }

        let mut items = Vec::new();
        let mut pages = 0u32;
        loop {
            let page = self
                .ctx
                .call("query", || self.ctx.client.query(request.clone()))
                .await?;
            pages += 1;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => break,
            }
        }
        debug!(backend = %BackendKind::KeyValue, pages, items = items.len(), "Query drained all pages");
        Ok(items)
    }

    async fn scan_inner(&self, input: &ScanInput) -> DataResult<Page> {
        input.validate()?;
        let mut builder = ExpressionBuilder::new();
        let filter = input.filter.as_ref().map(|f| builder.filter(f)).transpose()?;
        let projection = builder.projection(&input.projection);
        let request = ScanRequest {
            table: self.ctx.table.clone(),
            index_name: input.index_name.clone(),
            filter,
            projection,
            attributes: builder.finish(),
            limit: input.limit,
            exclusive_start_key: decode_key_cursor(input.cursor.as_deref())?,
        };
        self.connection.ensure_connected()?;

        let page = self
            .ctx
            .call("scan", || self.ctx.client.scan(request.clone()))
            .await?;
        Ok(Page::new(
            page.items,
            page.last_evaluated_key.map(|key| PageCursor::key(key).encode()),
        ))
    }

    async fn batch_get_inner(
        &self,
        keys: &[DatabaseKey],
        options: &BatchGetOptions,
    ) -> DataResult<Vec<Item>> {
        for key in keys {
            key.validate()?;
        }
        self.connection.ensure_connected()?;

        let mut seen = HashSet::new();
        let native_keys: Vec<Item> = keys
            .iter()
            .map(|key| self.ctx.native_key(key))
            .filter(|native| seen.insert(Value::Object(native.clone()).to_string()))
            .collect();

        let mut builder = ExpressionBuilder::new();
        let projection = builder.projection(&options.projection);
        let attributes = builder.finish();

        let mut items = Vec::with_capacity(native_keys.len());
        for chunk in native_keys.chunks(MAX_BATCH_GET_KEYS) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0u32;
            while !pending.is_empty() {
                let request = BatchGetRequest {
                    table: self.ctx.table.clone(),
                    keys: pending,
                    consistent_read: self.consistent(options.consistent_read),
                    projection: projection.clone(),
                    attributes: attributes.clone(),
                };
                let output = self
                    .ctx
                    .call("batch_get", || self.ctx.client.batch_get_item(request.clone()))
                    .await?;
                items.extend(output.items);
                pending = output.unprocessed_keys;

                if pending.is_empty() {
                    break;
                }
                if attempt >= self.ctx.resilience.config().max_retries {
                    return Err(DataError::new(
                        ErrorKind::ThroughputExceeded,
                        format!("{} keys remained unprocessed after retries", pending.len()),
                    )
                    .with_backend(BackendKind::KeyValue));
                }
                let delay = self.ctx.resilience.config().delay_for(attempt);
                warn!(
                    backend = %BackendKind::KeyValue,
                    unprocessed = pending.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Retrying unprocessed batch keys"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
        Ok(items)
    }

    async fn execute_transaction_inner(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> DataResult<()> {
        self.ctx.check_transaction_bound(operations.len())?;
        for operation in &operations {
            operation.validate()?;
        }
        self.connection.ensure_connected()?;
        let token = Uuid::new_v4().to_string();
        let request = self.ctx.transact_request(&operations, &token).await?;
        self.ctx.transact(request).await?;
        info!(
            backend = %BackendKind::KeyValue,
            operations = operations.len(),
            "Transaction committed"
        );
        Ok(())
    }

    async fn execute_native_inner(&self, command: NativeCommand) -> DataResult<Value> {
        let NativeCommand::Statement {
            statement,
            parameters,
        } = command
        else {
            return Err(DataError::validation(
                "the key-value backend only executes statements",
            )
            .with_backend(BackendKind::KeyValue));
        };
        if statement.trim().is_empty() {
            return Err(
                DataError::validation("statement must not be empty")
                    .with_backend(BackendKind::KeyValue),
            );
        }
        self.connection.ensure_connected()?;
        let request = StatementRequest {
            statement,
            parameters,
        };
        let items = self
            .ctx
            .call("execute_native", || {
                self.ctx.client.execute_statement(request.clone())
            })
            .await?;
        Ok(Value::Array(items.into_iter().map(Value::Object).collect()))
    }
}

fn unmet_condition(key: &DatabaseKey) -> DataError {
    DataError::conditional_check_failed(format!("update condition on {} not satisfied", key))
        .with_backend(BackendKind::KeyValue)
}

fn decode_key_cursor(cursor: Option<&str>) -> DataResult<Option<Item>> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };
    match PageCursor::decode(cursor)?.into_position() {
        CursorPosition::Key { key } => Ok(Some(key)),
        CursorPosition::Offset { .. } => Err(DataError::validation(
            "cursor was not issued by the key-value backend",
        )
        .with_backend(BackendKind::KeyValue)),
    }
}

#[async_trait]
impl DataProvider for KeyValueStore {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        vec![
            BackendCapability::Crud,
            BackendCapability::Query,
            BackendCapability::Scan,
            BackendCapability::BatchGet,
            BackendCapability::ConditionalWrites,
            BackendCapability::NativeTransactions,
            BackendCapability::ConsistentReads,
            BackendCapability::CursorPagination,
            BackendCapability::SecondaryIndexes,
            BackendCapability::NativeCommands,
        ]
    }

    async fn connect(&self) -> DataResult<()> {
        self.connection.connect().await
    }

    async fn disconnect(&self) -> DataResult<()> {
        self.connection.disconnect();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    async fn health_check(&self) -> DataResult<HealthStatus> {
        Ok(self.connection.health_check().await)
    }

    async fn get(&self, key: &DatabaseKey, options: &GetOptions) -> DataResult<Option<Item>> {
        let timer = self.metrics.start("get");
        let result = self.get_inner(key, options).await;
        timer.observe(&result, |item| usize::from(item.is_some()));
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::KeyValue, operation = "get", key = %key, ok = result.is_ok(), "Operation finished");
        result
    }

    async fn put(&self, item: Item, options: &PutOptions) -> DataResult<Item> {
        let timer = self.metrics.start("put");
        let result = self.put_inner(item, options).await;
        timer.observe(&result, |_| 1);
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::KeyValue, operation = "put", ok = result.is_ok(), "Operation finished");
        result
    }

    async fn update(&self, input: &UpdateInput) -> DataResult<Option<Item>> {
        let timer = self.metrics.start("update");
        let result = self.update_inner(input).await;
        timer.observe(&result, |item| usize::from(item.is_some()));
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::KeyValue, operation = "update", key = %input.key, ok = result.is_ok(), "Operation finished");
        result
    }

    async fn delete(&self, key: &DatabaseKey, options: &DeleteOptions) -> DataResult<()> {
        let timer = self.metrics.start("delete");
        let result = self.delete_inner(key, options).await;
        timer.observe(&result, |_| 0);
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::KeyValue, operation = "delete", key = %key, ok = result.is_ok(), "Operation finished");
        result
    }

    async fn query(&self, input: &QueryInput) -> DataResult<Vec<Item>> {
        let timer = self.metrics.start("query");
        let result = self.query_inner(input).await;
        timer.observe(&result, Vec::len);
        if result.is_ok() {
            self.connection.mark_success();
        }
        result
    }

    async fn query_page(&self, input: &QueryInput) -> DataResult<Page> {
        let timer = self.metrics.start("query");
        let result = self.query_page_inner(input).await;
        timer.observe(&result, |page| page.items.len());
        if result.is_ok() {
            self.connection.mark_success();
        }
        result
    }

    async fn scan(&self, input: &ScanInput) -> DataResult<Page> {
        let timer = self.metrics.start("scan");
        let result = self.scan_inner(input).await;
        timer.observe(&result, |page| page.items.len());
        if result.is_ok() {
            self.connection.mark_success();
        }
        result
    }

    async fn batch_get(
        &self,
        keys: &[DatabaseKey],
        options: &BatchGetOptions,
    ) -> DataResult<Vec<Item>> {
        let timer = self.metrics.start("batch_get");
        let result = self.batch_get_inner(keys, options).await;
        timer.observe(&result, Vec::len);
        if result.is_ok() {
            self.connection.mark_success();
        }
        result
    }

    async fn begin_native_transaction(
        &self,
        _options: &TransactionOptions,
    ) -> DataResult<Box<dyn NativeTransaction>> {
        self.connection.ensure_connected()?;
        Ok(Box::new(KeyValueTransaction::new(self.ctx.clone())))
    }

    async fn execute_transaction(&self, operations: Vec<TransactionOperation>) -> DataResult<()> {
        let timer = self.metrics.start("transaction");
        let count = operations.len();
        let result = self.execute_transaction_inner(operations).await;
        timer.observe(&result, |_| count);
        if result.is_ok() {
            self.connection.mark_success();
        }
        result
    }

    async fn execute_native(&self, command: NativeCommand) -> DataResult<Value> {
        let timer = self.metrics.start("execute_native");
        let result = self.execute_native_inner(command).await;
        timer.observe(&result, |value| value.as_array().map_or(0, Vec::len));
        result
    }

    fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }
}
