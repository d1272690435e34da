//! Fixtures: items, adapters over the in-memory clients, and a connector
//! that hands those clients to the factory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use unistore::DataResult;
use unistore::backends::AdapterSettings;
use unistore::backends::document::{DocumentApi, DocumentConfig, DocumentStore};
use unistore::backends::keyvalue::{KeyValueApi, KeyValueConfig, KeyValueStore};
use unistore::config::{ClientConnector, DataConfig};
use unistore::core::{DataProvider, RetryConfig};
use unistore::types::Item;

use super::{MockDocumentClient, MockKeyValueClient};

/// Table name used by the key-value fixtures.
pub const TABLE: &str = "app-items";

/// Converts a JSON object literal into an item.
pub fn item(value: Value) -> Item {
    value
        .as_object()
        .cloned()
        .expect("fixture must be a JSON object")
}

/// Retry policy with millisecond delays.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

/// Adapter settings with [`fast_retry`].
pub fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        retry: fast_retry(),
        ..AdapterSettings::default()
    }
}

pub fn kv_config() -> KeyValueConfig {
    KeyValueConfig::new(TABLE)
}

pub fn document_config() -> DocumentConfig {
    DocumentConfig::new("mongodb://localhost:27017", "app")
        .with_collection("user", "users")
        .with_collection("order", "orders")
}

/// A connected key-value adapter over a fresh in-memory table.
pub async fn kv_store() -> (Arc<MockKeyValueClient>, Arc<KeyValueStore>) {
    kv_store_with(kv_config()).await
}

pub async fn kv_store_with(
    config: KeyValueConfig,
) -> (Arc<MockKeyValueClient>, Arc<KeyValueStore>) {
    let client = Arc::new(MockKeyValueClient::new(TABLE));
    let store = Arc::new(KeyValueStore::with_settings(
        config,
        client.clone(),
        fast_settings(),
    ));
    store.connect().await.expect("connect key-value adapter");
    (client, store)
}

/// A connected document adapter over a fresh in-memory database.
pub async fn document_store() -> (Arc<MockDocumentClient>, Arc<DocumentStore>) {
    document_store_with(document_config()).await
}

pub async fn document_store_with(
    config: DocumentConfig,
) -> (Arc<MockDocumentClient>, Arc<DocumentStore>) {
    let client = Arc::new(MockDocumentClient::new());
    let store = Arc::new(DocumentStore::with_settings(
        config,
        client.clone(),
        fast_settings(),
    ));
    store.connect().await.expect("connect document adapter");
    (client, store)
}

/// Both adapters, for tests that must hold on every backend.
pub async fn all_stores() -> Vec<Arc<dyn DataProvider>> {
    let (_, kv) = kv_store().await;
    let (_, doc) = document_store().await;
    vec![kv as Arc<dyn DataProvider>, doc as Arc<dyn DataProvider>]
}

/// Connector handing out shared in-memory clients and counting builds.
#[derive(Debug)]
pub struct MockConnector {
    pub key_value: Arc<MockKeyValueClient>,
    pub document: Arc<MockDocumentClient>,
    builds: AtomicU32,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            key_value: Arc::new(MockKeyValueClient::new(TABLE)),
            document: Arc::new(MockDocumentClient::new()),
            builds: AtomicU32::new(0),
        }
    }
}

impl MockConnector {
    /// Number of clients built.
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientConnector for MockConnector {
    async fn key_value_client(&self, _config: &KeyValueConfig) -> DataResult<Arc<dyn KeyValueApi>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.key_value.clone())
    }

    async fn document_client(&self, _config: &DocumentConfig) -> DataResult<Arc<dyn DocumentApi>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.document.clone())
    }
}

/// Factory configuration for the key-value fixtures.
pub fn kv_data_config() -> DataConfig {
    let mut config = DataConfig::key_value(kv_config());
    config.retry = fast_retry();
    config
}

/// Factory configuration for the document fixtures.
pub fn document_data_config() -> DataConfig {
    let mut config = DataConfig::document(document_config());
    config.retry = fast_retry();
    config
}
