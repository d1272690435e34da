//! [`DataProvider`] implementation for the document backend.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::client::{DocumentApi, DocumentSession, FindOptions};
use super::config::DocumentConfig;
use super::filter::{
    COMPOSITE_ATTRIBUTE, and_all, any_key, filter_condition, key_condition, key_filter,
    projection, put_document, sort_spec, strip_id, update_document,
};
use super::transaction::DocumentTransaction;
use crate::backends::AdapterSettings;
use crate::core::{
    BackendCapability, BackendKind, ConnectionEvent, ConnectionManager, ConnectionProbe,
    DataProvider, MetricsCollector, NativeTransaction, Resilience, TransactionOptions,
};
use crate::error::{DataError, DataResult, ErrorKind, NativeError};
use crate::translator::TranslatorRegistry;
use crate::types::{
    BatchGetOptions, CursorPosition, DatabaseKey, DeleteOptions, FilterCondition, GetOptions,
    HealthStatus, Item, NativeCommand, Page, PageCursor, PutOptions, QueryInput, ScanInput, SortOrder,
    TransactionOperation, UpdateInput, normalize_item_key,
};

/// Collection routing and native call execution.
///
/// Shared by the adapter and its session transactions.
#[derive(Debug, Clone)]
pub(crate) struct CollectionContext {
    pub(crate) client: Arc<dyn DocumentApi>,
    pub(crate) config: Arc<DocumentConfig>,
    pub(crate) translators: Arc<TranslatorRegistry>,
    pub(crate) resilience: Resilience,
}

impl CollectionContext {
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

    pub(crate) fn translate(&self, error: NativeError) -> DataError {
        self.translators.translate(error)
    }

    pub(crate) fn collection_for(&self, key: &DatabaseKey) -> String {
        self.config.collection_for(key.namespace()).to_string()
    }

    /// Applies one operation inside an open session transaction.
    ///
    /// Session calls are not retried here; commit-level retries belong to the
    /// transaction layer.
    pub(crate) async fn apply_in_session(
        &self,
        session: &mut dyn DocumentSession,
        operation: &TransactionOperation,
    ) -> DataResult<()> {
        let now = Utc::now();
        match operation {
            TransactionOperation::Put { item } => {
                let mut item = item.clone();
                let key = normalize_item_key(&mut item)?;
                let document = put_document(item, &key, now);
                session
                    .replace_one(&self.collection_for(&key), key_filter(&key), document, true)
                    .await
                    .map_err(|e| self.translate(e))?;
            }
            TransactionOperation::Update(input) => {
                let upsert = input.condition.is_none();
                let update = update_document(input, now, upsert)?;
                let filter = self.conditional_filter(&input.key, input.condition.as_ref())?;
                let matched = session
                    .update_one(&self.collection_for(&input.key), filter, update, upsert)
                    .await
                    .map_err(|e| self.translate(e))?;
                if matched == 0 && !upsert {
                    return Err(condition_failed(&input.key));
                }
            }
            TransactionOperation::Delete { key } => {
                key.validate()?;
                session
                    .delete_one(&self.collection_for(key), key_filter(key))
                    .await
                    .map_err(|e| self.translate(e))?;
            }
            TransactionOperation::ConditionCheck { key, condition } => {
                let filter = self.conditional_filter(key, Some(condition))?;
                let found = session
                    .find_one(&self.collection_for(key), filter)
                    .await
                    .map_err(|e| self.translate(e))?;
                if found.is_none() {
                    return Err(condition_failed(key));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn conditional_filter(
        &self,
        key: &DatabaseKey,
        condition: Option<&FilterCondition>,
    ) -> DataResult<Item> {
        key.validate()?;
        let mut filters = vec![key_filter(key)];
        if let Some(condition) = condition {
            filters.push(filter_condition(condition)?);
        }
        Ok(and_all(filters))
    }
}

fn condition_failed(key: &DatabaseKey) -> DataError {
    DataError::conditional_check_failed(format!("condition failed for key {}", key))
        .with_backend(BackendKind::Document)
}

#[derive(Debug)]
struct PingProbe {
    client: Arc<dyn DocumentApi>,
}

#[async_trait]
impl ConnectionProbe for PingProbe {
    async fn probe(&self) -> Result<(), NativeError> {
        self.client.ping().await
    }
}

/// Document adapter.
///
/// Items are routed to collections by key prefix and addressed by the
/// derived `pksk` composite.
#[derive(Debug)]
pub struct DocumentStore {
    ctx: CollectionContext,
    connection: ConnectionManager,
    metrics: Arc<MetricsCollector>,
}

impl DocumentStore {
    /// Creates an adapter with default settings.
    pub fn new(config: DocumentConfig, client: Arc<dyn DocumentApi>) -> Self {
        Self::with_settings(config, client, AdapterSettings::default())
    }

    /// Creates an adapter with explicit translators, retry and metrics settings.
    pub fn with_settings(
        config: DocumentConfig,
        client: Arc<dyn DocumentApi>,
        settings: AdapterSettings,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new(settings.metrics));
        let resilience = Resilience::new(settings.retry);
        let connection = ConnectionManager::new(
            BackendKind::Document,
            Arc::new(PingProbe {
                client: client.clone(),
            }),
            settings.translators.clone(),
            metrics.clone(),
            resilience.clone(),
            config.max_reconnect_attempts,
        );
        let ctx = CollectionContext {
            client,
            config: Arc::new(config),
            translators: settings.translators,
            resilience,
        };
        Self {
            ctx,
            connection,
            metrics,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DocumentConfig {
        &self.ctx.config
    }

    /// Returns the connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Disconnects and connects again, up to the configured attempt count.
    pub async fn reconnect(&self) -> DataResult<()> {
        self.connection.reconnect().await
    }

    /// Gives typed access to the native client.
    pub fn with_client<R>(&self, f: impl FnOnce(&dyn DocumentApi) -> R) -> R {
        f(self.ctx.client.as_ref())
    }

    async fn ensure_indexes(&self) {
        for collection in self.ctx.config.all_collections() {
            let result = self
                .ctx
                .call("create_index", || {
                    self.ctx
                        .client
                        .create_unique_index(&collection, COMPOSITE_ATTRIBUTE)
                })
                .await;
            if let Err(e) = result {
                warn!(
                    backend = %BackendKind::Document,
                    collection = %collection,
                    error = %e,
                    "Failed to ensure unique composite index"
                );
            }
        }
    }

    async fn get_inner(&self, key: &DatabaseKey, options: &GetOptions) -> DataResult<Option<Item>> {
        key.validate()?;
        self.connection.ensure_connected()?;
        let collection = self.ctx.collection_for(key);
        let found = self
            .ctx
            .call("get", || {
                self.ctx.client.find_one(
                    &collection,
                    key_filter(key),
                    projection(&options.projection),
                )
            })
            .await?;
        Ok(found.map(strip_id))
    }

    async fn put_inner(&self, mut item: Item, options: &PutOptions) -> DataResult<Item> {
        options.validate()?;
        let key = normalize_item_key(&mut item)?;
        self.connection.ensure_connected()?;

        let document = put_document(item, &key, Utc::now());
        let collection = self.ctx.collection_for(&key);

        if options.if_not_exists {
            return match self.insert(&collection, &document).await {
                Ok(()) => Ok(document),
                Err(e) if e.kind() == ErrorKind::DuplicateKey => Err(condition_failed(&key)),
                Err(e) => Err(e),
            };
        }

        let Some(condition) = &options.condition else {
            self.ctx
                .call("put", || {
                    self.ctx
                        .client
                        .replace_one(&collection, key_filter(&key), document.clone(), true)
                })
                .await?;
            return Ok(document);
        };

        let filter = self.ctx.conditional_filter(&key, Some(condition))?;
        let matched = self
            .ctx
            .call("put", || {
                self.ctx
                    .client
                    .replace_one(&collection, filter.clone(), document.clone(), false)
            })
            .await?;
        if matched > 0 {
            return Ok(document);
        }
        // No stored item matched. Insert only if the condition holds for an
        // absent item; the unique index rejects the insert if one exists.
        if !condition.matches(&Item::new()) {
            return Err(condition_failed(&key));
        }
        match self.insert(&collection, &document).await {
            Ok(()) => Ok(document),
            Err(e) if e.kind() == ErrorKind::DuplicateKey => Err(condition_failed(&key)),
            Err(e) => Err(e),
        }
    }

    async fn insert(&self, collection: &str, document: &Item) -> DataResult<()> {
        self.ctx
            .call("put", || {
                self.ctx.client.insert_one(collection, document.clone())
            })
            .await
    }

    async fn update_inner(&self, input: &UpdateInput) -> DataResult<Option<Item>> {
        let upsert = input.condition.is_none();
        let update = update_document(input, Utc::now(), upsert)?;
        let filter = self
            .ctx
            .conditional_filter(&input.key, input.condition.as_ref())?;
        self.connection.ensure_connected()?;

        let collection = self.ctx.collection_for(&input.key);
        let updated = self
            .ctx
            .call("update", || {
                self.ctx.client.find_one_and_update(
                    &collection,
                    filter.clone(),
                    update.clone(),
                    upsert,
                )
            })
            .await?;
        match updated {
            Some(item) => Ok(Some(strip_id(item))),
            None if !upsert => Err(condition_failed(&input.key)),
            None => Ok(None),
        }
    }

    async fn delete_inner(&self, key: &DatabaseKey, options: &DeleteOptions) -> DataResult<()> {
        options.validate()?;
        let filter = self
            .ctx
            .conditional_filter(key, options.condition.as_ref())?;
        self.connection.ensure_connected()?;

        let collection = self.ctx.collection_for(key);
        let deleted = self
            .ctx
            .call("delete", || {
                self.ctx.client.delete_one(&collection, filter.clone())
            })
            .await?;
        if deleted == 0 && options.condition.is_some() {
            return Err(condition_failed(key));
        }
        Ok(())
    }

    /// Resolves the collection from the key condition's value prefix.
    fn query_collection(&self, input: &QueryInput) -> String {
        let namespace = input
            .key_condition
            .as_ref()
            .and_then(|c| c.value.as_str())
            .and_then(|v| v.split_once('#'))
            .map(|(prefix, _)| prefix)
            .filter(|prefix| !prefix.is_empty());
        self.ctx.config.collection_for(namespace).to_string()
    }

    async fn query_page_inner(&self, input: &QueryInput) -> DataResult<Page> {
        input.validate()?;
        let skip = match decode_offset_cursor(input.cursor.as_deref())? {
            Some((_, skip)) => skip,
            None => 0,
        };
        let mut filters = Vec::new();
        if let Some(condition) = &input.key_condition {
            filters.push(key_condition(condition)?);
        }
        if let Some(filter) = &input.filter {
            filters.push(filter_condition(filter)?);
        }
        let filter = and_all(filters);
        self.connection.ensure_connected()?;

        let collection = self.query_collection(input);
        let options = FindOptions {
            projection: projection(&input.projection),
            sort: Some(sort_spec(input.sort_order == SortOrder::Asc)),
            skip: (skip > 0).then_some(skip),
            limit: input.limit.map(i64::from),
            hint: input.index_name.clone(),
        };
        let items: Vec<Item> = self
            .ctx
            .call("query", || {
                self.ctx
                    .client
                    .find(&collection, filter.clone(), options.clone())
            })
            .await?
            .into_iter()
            .map(strip_id)
            .collect();

        let cursor = input
            .limit
            .filter(|limit| items.len() == *limit as usize)
            .map(|_| PageCursor::offset(0, skip + items.len() as u64).encode());
        Ok(Page::new(items, cursor))
    }

    async fn scan_inner(&self, input: &ScanInput) -> DataResult<Page> {
        input.validate()?;
        let (mut index, mut skip) = decode_offset_cursor(input.cursor.as_deref())?.unwrap_or((0, 0));
        let filter = match &input.filter {
            Some(condition) => filter_condition(condition)?,
            None => Item::new(),
        };
        self.connection.ensure_connected()?;

        let collections = self.ctx.config.all_collections();
        let limit = input.limit.map(|l| l as usize);
        let mut items = Vec::new();
        while index < collections.len() {
            let options = FindOptions {
                projection: projection(&input.projection),
                sort: Some(sort_spec(true)),
                skip: (skip > 0).then_some(skip),
                limit: limit.map(|l| (l - items.len()) as i64),
                hint: input.index_name.clone(),
            };
            let batch = self
                .ctx
                .call("scan", || {
                    self.ctx
                        .client
                        .find(&collections[index], filter.clone(), options.clone())
                })
                .await?;
            let fetched = batch.len() as u64;
            items.extend(batch.into_iter().map(strip_id));

            if limit.is_some_and(|l| items.len() >= l) {
                let cursor = PageCursor::offset(index, skip + fetched).encode();
                return Ok(Page::new(items, Some(cursor)));
            }
            index += 1;
            skip = 0;
        }
        Ok(Page::new(items, None))
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
        let mut by_collection: BTreeMap<String, Vec<DatabaseKey>> = BTreeMap::new();
        for key in keys {
            if seen.insert(key.composite()) {
                by_collection
                    .entry(self.ctx.collection_for(key))
                    .or_default()
                    .push(key.clone());
            }
        }

        let find_options = FindOptions {
            projection: projection(&options.projection),
            ..FindOptions::default()
        };
        let mut items = Vec::with_capacity(seen.len());
        for (collection, keys) in &by_collection {
            let filter = any_key(keys);
            let found = self
                .ctx
                .call("batch_get", || {
                    self.ctx
                        .client
                        .find(collection, filter.clone(), find_options.clone())
                })
                .await?;
            items.extend(found.into_iter().map(strip_id));
        }
        Ok(items)
    }

    fn ensure_transactions_enabled(&self) -> DataResult<()> {
        if self.ctx.config.transactions_enabled {
            Ok(())
        } else {
            Err(
                DataError::transaction("session transactions are disabled for this deployment")
                    .with_backend(BackendKind::Document),
            )
        }
    }

    async fn open_session(&self) -> DataResult<Box<dyn DocumentSession>> {
        let mut session = self
            .ctx
            .call("transaction", || self.ctx.client.start_session())
            .await?;
        session
            .start_transaction()
            .await
            .map_err(|e| self.ctx.translate(e))?;
        Ok(session)
    }

    async fn execute_transaction_inner(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> DataResult<()> {
        for operation in &operations {
            operation.validate()?;
        }
        self.ensure_transactions_enabled()?;
        self.connection.ensure_connected()?;
        if operations.is_empty() {
            return Ok(());
        }

        let mut session = self.open_session().await?;
        let mut applied = Ok(());
        for operation in &operations {
            applied = self.ctx.apply_in_session(session.as_mut(), operation).await;
            if applied.is_err() {
                break;
            }
        }
        if let Err(e) = applied {
            if let Err(abort) = session.abort_transaction().await {
                warn!(
                    backend = %BackendKind::Document,
                    error = %self.ctx.translate(abort),
                    "Failed to abort session transaction"
                );
            }
            return Err(e);
        }
        session
            .commit_transaction()
            .await
            .map_err(|e| self.ctx.translate(e))?;
        info!(
            backend = %BackendKind::Document,
            operations = operations.len(),
            "Transaction committed"
        );
        Ok(())
    }

    async fn execute_native_inner(&self, command: NativeCommand) -> DataResult<Value> {
        let NativeCommand::Document(command) = command else {
            return Err(DataError::validation(
                "the document backend only executes command documents",
            )
            .with_backend(BackendKind::Document));
        };
        if command.is_empty() {
            return Err(
                DataError::validation("command document must not be empty")
                    .with_backend(BackendKind::Document),
            );
        }
        self.connection.ensure_connected()?;
        let reply = self
            .ctx
            .call("execute_native", || {
                self.ctx.client.run_command(command.clone())
            })
            .await?;
        Ok(Value::Object(reply))
    }
}

fn decode_offset_cursor(cursor: Option<&str>) -> DataResult<Option<(usize, u64)>> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };
    match PageCursor::decode(cursor)?.into_position() {
        CursorPosition::Offset {
            collection_index,
            skip,
        } => Ok(Some((collection_index, skip))),
        CursorPosition::Key { .. } => Err(DataError::validation(
            "cursor was not issued by the document backend",
        )
        .with_backend(BackendKind::Document)),
    }
}

#[async_trait]
impl DataProvider for DocumentStore {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        let mut capabilities = vec![
            BackendCapability::Crud,
            BackendCapability::Query,
            BackendCapability::Scan,
            BackendCapability::BatchGet,
            BackendCapability::ConditionalWrites,
            BackendCapability::OffsetPagination,
            BackendCapability::SecondaryIndexes,
            BackendCapability::NativeCommands,
        ];
        if self.ctx.config.transactions_enabled {
            capabilities.push(BackendCapability::NativeTransactions);
        }
        capabilities
    }

    async fn connect(&self) -> DataResult<()> {
        self.connection.connect().await?;
        self.ensure_indexes().await;
        Ok(())
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
        debug!(backend = %BackendKind::Document, operation = "get", key = %key, ok = result.is_ok(), "Operation finished");
        result
    }

    async fn put(&self, item: Item, options: &PutOptions) -> DataResult<Item> {
        let timer = self.metrics.start("put");
        let result = self.put_inner(item, options).await;
        timer.observe(&result, |_| 1);
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::Document, operation = "put", ok = result.is_ok(), "Operation finished");
        result
    }

    async fn update(&self, input: &UpdateInput) -> DataResult<Option<Item>> {
        let timer = self.metrics.start("update");
        let result = self.update_inner(input).await;
        timer.observe(&result, |item| usize::from(item.is_some()));
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::Document, operation = "update", key = %input.key, ok = result.is_ok(), "Operation finished");
        result
    }

    async fn delete(&self, key: &DatabaseKey, options: &DeleteOptions) -> DataResult<()> {
        let timer = self.metrics.start("delete");
        let result = self.delete_inner(key, options).await;
        timer.observe(&result, |_| 0);
        if result.is_ok() {
            self.connection.mark_success();
        }
        debug!(backend = %BackendKind::Document, operation = "delete", key = %key, ok = result.is_ok(), "Operation finished");
        result
    }

    async fn query(&self, input: &QueryInput) -> DataResult<Vec<Item>> {
        let timer = self.metrics.start("query");
        let result = self.query_page_inner(input).await.map(|page| page.items);
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
        self.ensure_transactions_enabled()?;
        self.connection.ensure_connected()?;
        let session = self.open_session().await?;
        Ok(Box::new(DocumentTransaction::new(self.ctx.clone(), session)))
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
        timer.observe(&result, |_| 1);
        result
    }

    fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }
}
