//! Adapter construction and caching.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::DataConfig;
use crate::backends::document::{DocumentApi, DocumentConfig, DocumentStore};
use crate::backends::keyvalue::{KeyValueApi, KeyValueConfig, KeyValueStore};
use crate::core::{BackendKind, DataProvider};
use crate::error::{DataError, DataResult};
use crate::transaction::TransactionManager;
use crate::translator::TranslatorRegistry;

/// Builds native clients for the factory.
#[async_trait]
pub trait ClientConnector: Send + Sync + std::fmt::Debug {
    /// Builds a key-value client.
    async fn key_value_client(&self, config: &KeyValueConfig) -> DataResult<Arc<dyn KeyValueApi>>;

    /// Builds a document client.
    async fn document_client(&self, config: &DocumentConfig) -> DataResult<Arc<dyn DocumentApi>>;
}

/// Connector for the production clients compiled in through cargo features.
///
/// A backend whose feature is disabled yields a configuration error.
#[derive(Debug, Clone)]
pub struct NativeConnector {
    translators: Arc<TranslatorRegistry>,
}

impl NativeConnector {
    /// Creates a connector translating client construction errors with
    /// `translators`.
    pub fn new(translators: Arc<TranslatorRegistry>) -> Self {
        Self { translators }
    }
}

impl Default for NativeConnector {
    fn default() -> Self {
        Self::new(Arc::new(TranslatorRegistry::with_defaults()))
    }
}

#[async_trait]
impl ClientConnector for NativeConnector {
    async fn key_value_client(&self, config: &KeyValueConfig) -> DataResult<Arc<dyn KeyValueApi>> {
        connect_key_value(config).await
    }

    async fn document_client(&self, config: &DocumentConfig) -> DataResult<Arc<dyn DocumentApi>> {
        connect_document(config, &self.translators).await
    }
}

#[cfg(feature = "dynamodb")]
async fn connect_key_value(config: &KeyValueConfig) -> DataResult<Arc<dyn KeyValueApi>> {
    use crate::backends::keyvalue::AwsDynamoClient;

    let sdk = AwsDynamoClient::load_sdk_config(Some(&config.region)).await;
    Ok(Arc::new(AwsDynamoClient::from_sdk_config(
        &sdk,
        config.endpoint_url.as_deref(),
    )))
}

#[cfg(not(feature = "dynamodb"))]
async fn connect_key_value(_config: &KeyValueConfig) -> DataResult<Arc<dyn KeyValueApi>> {
    Err(DataError::configuration(
        "the key-value backend requires the `dynamodb` feature",
    ))
}

#[cfg(feature = "mongodb")]
async fn connect_document(
    config: &DocumentConfig,
    translators: &TranslatorRegistry,
) -> DataResult<Arc<dyn DocumentApi>> {
    use crate::backends::document::MongoDocumentClient;

    let client = MongoDocumentClient::connect(
        &config.uri,
        &config.database,
        config.min_pool_size,
        config.max_pool_size,
    )
    .await
    .map_err(|e| translators.translate(e))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_document(
    _config: &DocumentConfig,
    _translators: &TranslatorRegistry,
) -> DataResult<Arc<dyn DocumentApi>> {
    Err(DataError::configuration(
        "the document backend requires the `mongodb` feature",
    ))
}

/// Builds connected adapters from configuration, caching them by
/// configuration fingerprint.
///
/// A cached adapter that has lost its connection is evicted and rebuilt on
/// the next `create`.
#[derive(Debug)]
pub struct ProviderFactory {
    connector: Arc<dyn ClientConnector>,
    translators: Arc<TranslatorRegistry>,
    cache: Mutex<HashMap<String, Arc<dyn DataProvider>>>,
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory {
    /// Creates a factory using the production clients.
    pub fn new() -> Self {
        let translators = Arc::new(TranslatorRegistry::with_defaults());
        Self::with_connector(
            Arc::new(NativeConnector::new(translators.clone())),
            translators,
        )
    }

    /// Creates a factory with a custom connector.
    pub fn with_connector(
        connector: Arc<dyn ClientConnector>,
        translators: Arc<TranslatorRegistry>,
    ) -> Self {
        Self {
            connector,
            translators,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a connected adapter for `config`, reusing a cached one.
    pub async fn create(&self, config: &DataConfig) -> DataResult<Arc<dyn DataProvider>> {
        config.validate()?;
        let fingerprint = config.fingerprint();

        let mut cache = self.cache.lock().await;
        if let Some(provider) = cache.get(&fingerprint) {
            if provider.is_connected() {
                debug!(backend = %config.provider, "Reusing cached adapter");
                return Ok(provider.clone());
            }
            debug!(backend = %config.provider, "Evicting disconnected adapter");
            cache.remove(&fingerprint);
        }

        let provider = self.build(config).await?;
        provider.connect().await?;
        info!(backend = %config.provider, "Adapter connected");
        cache.insert(fingerprint, provider.clone());
        Ok(provider)
    }

    /// Returns the cached adapter for `config`, if any.
    pub async fn get_cached(&self, config: &DataConfig) -> Option<Arc<dyn DataProvider>> {
        self.cache.lock().await.get(&config.fingerprint()).cloned()
    }

    /// Returns the number of cached adapters.
    pub async fn cached_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Disconnects and drops every cached adapter.
    pub async fn clear(&self) -> DataResult<()> {
        let providers: Vec<_> = self.cache.lock().await.drain().map(|(_, p)| p).collect();
        for provider in providers {
            provider.disconnect().await?;
        }
        Ok(())
    }

    /// Creates a transaction manager for `provider` with the configured
    /// transaction defaults.
    pub fn transaction_manager(
        &self,
        provider: Arc<dyn DataProvider>,
        config: &DataConfig,
    ) -> TransactionManager {
        TransactionManager::with_config(provider, config.transactions.clone())
    }

    async fn build(&self, config: &DataConfig) -> DataResult<Arc<dyn DataProvider>> {
        let settings = config.adapter_settings(self.translators.clone());
        match config.provider {
            BackendKind::KeyValue => {
                let kv = config.keyvalue.clone().ok_or_else(|| {
                    DataError::configuration("provider is keyvalue but no keyvalue block is set")
                })?;
                let client = self.connector.key_value_client(&kv).await?;
                Ok(Arc::new(KeyValueStore::with_settings(kv, client, settings)))
            }
            BackendKind::Document => {
                let doc = config.document.clone().ok_or_else(|| {
                    DataError::configuration("provider is document but no document block is set")
                })?;
                let client = self.connector.document_client(&doc).await?;
                Ok(Arc::new(DocumentStore::with_settings(doc, client, settings)))
            }
        }
    }
}
