//! Provider factory and configuration loading tests.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::*;
use unistore::backends::document::DocumentConfig;
use unistore::backends::keyvalue::KeyValueConfig;
use unistore::config::{DataConfig, ProviderFactory};
use unistore::core::BackendKind;
use unistore::translator::TranslatorRegistry;
use unistore::types::{DatabaseKey, GetOptions, PutOptions};
use unistore::{DataProvider, ErrorKind, NativeError};

fn factory() -> (Arc<MockConnector>, ProviderFactory) {
    let connector = Arc::new(MockConnector::default());
    let factory = ProviderFactory::with_connector(
        connector.clone(),
        Arc::new(TranslatorRegistry::with_defaults()),
    );
    (connector, factory)
}

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

// ============================================================================
// Caching Tests
// ============================================================================

#[tokio::test]
async fn test_create_returns_connected_cached_adapter() {
    let (connector, factory) = factory();
    let config = kv_data_config();

    let first = factory.create(&config).await.unwrap();
    assert!(first.is_connected());
    assert_eq!(first.backend_kind(), BackendKind::KeyValue);

    let second = factory.create(&config).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(connector.builds(), 1);
    assert_eq!(factory.cached_count().await, 1);
    assert!(factory.get_cached(&config).await.is_some());
}

#[tokio::test]
async fn test_distinct_configs_get_distinct_adapters() {
    let (connector, factory) = factory();

    let kv = factory.create(&kv_data_config()).await.unwrap();
    let doc = factory.create(&document_data_config()).await.unwrap();
    assert_eq!(kv.backend_kind(), BackendKind::KeyValue);
    assert_eq!(doc.backend_kind(), BackendKind::Document);

    let mut consistent = kv_data_config();
    consistent.keyvalue.as_mut().unwrap().consistent_read = true;
    let other = factory.create(&consistent).await.unwrap();
    assert!(!Arc::ptr_eq(&kv, &other));

    assert_eq!(connector.builds(), 3);
    assert_eq!(factory.cached_count().await, 3);
}

#[tokio::test]
async fn test_disconnected_adapter_is_rebuilt() {
    let (connector, factory) = factory();
    let config = document_data_config();

    let first = factory.create(&config).await.unwrap();
    first.disconnect().await.unwrap();

    let second = factory.create(&config).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_connected());
    assert_eq!(connector.builds(), 2);
    assert_eq!(factory.cached_count().await, 1);
}

#[tokio::test]
async fn test_clear_disconnects_cached_adapters() {
    let (_, factory) = factory();
    let kv = factory.create(&kv_data_config()).await.unwrap();
    let doc = factory.create(&document_data_config()).await.unwrap();

    factory.clear().await.unwrap();
    assert_eq!(factory.cached_count().await, 0);
    assert!(!kv.is_connected());
    assert!(!doc.is_connected());
}

#[tokio::test]
async fn test_adapter_uses_configured_retry_policy() {
    let (connector, factory) = factory();
    let provider = factory.create(&kv_data_config()).await.unwrap();
    connector.key_value.faults.fail(
        "get_item",
        NativeError::new(BackendKind::KeyValue, "throttled").with_code("ThrottlingException"),
        2,
    );

    provider
        .get(&DatabaseKey::new("user#1"), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(connector.key_value.faults.calls("get_item"), 3);
}

#[tokio::test]
async fn test_adapters_share_connector_clients() {
    let (connector, factory) = factory();
    let provider = factory.create(&document_data_config()).await.unwrap();

    provider
        .put(item(json!({"pk": "user#1", "name": "John"})), &PutOptions::default())
        .await
        .unwrap();
    assert!(connector.document.by_composite("user#1").is_some());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_config_is_rejected_before_building() {
    let (connector, factory) = factory();

    let err = factory
        .create(&DataConfig::key_value(KeyValueConfig::new("")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = factory
        .create(&DataConfig::document(DocumentConfig::new("http://localhost", "app")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let mut missing_block = kv_data_config();
    missing_block.provider = BackendKind::Document;
    let err = factory.create(&missing_block).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    assert_eq!(connector.builds(), 0);
}

#[tokio::test]
async fn test_connect_failure_is_not_cached() {
    let (connector, factory) = factory();
    connector.key_value.set_reachable(false);

    let err = factory.create(&kv_data_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(factory.cached_count().await, 0);

    connector.key_value.set_reachable(true);
    let provider = factory.create(&kv_data_config()).await.unwrap();
    assert!(provider.is_connected());
}

#[cfg(not(feature = "dynamodb"))]
#[tokio::test]
async fn test_native_connector_requires_dynamodb_feature() {
    let factory = ProviderFactory::new();
    let err = factory.create(&kv_data_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.message().contains("dynamodb"));
}

#[cfg(not(feature = "mongodb"))]
#[tokio::test]
async fn test_native_connector_requires_mongodb_feature() {
    let factory = ProviderFactory::new();
    let err = factory.create(&document_data_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.message().contains("mongodb"));
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[tokio::test]
async fn test_transaction_manager_uses_config_defaults() {
    let (_, factory) = factory();
    let mut config = DataConfig::document(document_config().with_transactions(false));
    config.retry = fast_retry();
    config.transactions.enable_fallback = false;

    let provider = factory.create(&config).await.unwrap();
    let manager = factory.transaction_manager(provider, &config);
    assert!(!manager.config().enable_fallback);

    let err = manager.begin_default().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[test]
fn test_from_lookup_document() {
    let config = DataConfig::from_lookup(lookup(&[
        ("UNISTORE_PROVIDER", "mongodb"),
        ("UNISTORE_DOC_URI", "mongodb://db:27017"),
        ("UNISTORE_DOC_DATABASE", "app"),
        ("UNISTORE_DOC_COLLECTIONS", "user=users, order=orders"),
        ("UNISTORE_DOC_TRANSACTIONS", "false"),
        ("UNISTORE_MIGRATION_BATCH_SIZE", "25"),
        ("UNISTORE_TX_TIMEOUT", "5s"),
    ]))
    .unwrap();

    assert_eq!(config.provider, BackendKind::Document);
    assert!(config.keyvalue.is_none());
    let doc = config.document.as_ref().unwrap();
    assert_eq!(doc.uri, "mongodb://db:27017");
    assert_eq!(doc.collection_for(Some("order")), "orders");
    assert!(!doc.transactions_enabled);
    assert_eq!(config.migration.batch_size, 25);
    assert_eq!(config.transactions.default_timeout, Duration::from_secs(5));
    config.validate().unwrap();
}

#[test]
fn test_from_lookup_builds_both_blocks_for_migration() {
    let config = DataConfig::from_lookup(lookup(&[
        ("UNISTORE_PROVIDER", "keyvalue"),
        ("UNISTORE_KV_TABLE", "app-items"),
        ("UNISTORE_KV_CONSISTENT_READ", "yes"),
        ("UNISTORE_DOC_URI", "mongodb://db:27017"),
        ("UNISTORE_DOC_DATABASE", "app"),
        ("UNISTORE_MIGRATION_ENABLED", "true"),
    ]))
    .unwrap();

    assert_eq!(config.provider, BackendKind::KeyValue);
    assert!(config.keyvalue.as_ref().unwrap().consistent_read);
    assert!(config.document.is_some());
    assert!(config.migration.enabled);
}

#[test]
fn test_from_lookup_errors() {
    let err = DataConfig::from_lookup(lookup(&[])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = DataConfig::from_lookup(lookup(&[("UNISTORE_PROVIDER", "cassandra")])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = DataConfig::from_lookup(lookup(&[
        ("UNISTORE_PROVIDER", "keyvalue"),
        ("UNISTORE_KV_TABLE", "items"),
        ("UNISTORE_KV_CONSISTENT_READ", "maybe"),
    ]))
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = DataConfig::from_lookup(lookup(&[
        ("UNISTORE_PROVIDER", "document"),
        ("UNISTORE_DOC_URI", "mongodb://db"),
        ("UNISTORE_DOC_DATABASE", "app"),
        ("UNISTORE_DOC_COLLECTIONS", "users"),
    ]))
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_config_deserializes_durations() {
    let config: DataConfig = serde_json::from_value(json!({
        "provider": "document",
        "document": {"uri": "mongodb://localhost", "database": "app"},
        "retry": {"max_retries": 5, "initial_delay": "50ms"},
        "transactions": {"default_timeout": "1m", "sweep_interval": "10s"}
    }))
    .unwrap();

    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.initial_delay, Duration::from_millis(50));
    assert_eq!(config.transactions.default_timeout, Duration::from_secs(60));
    assert_eq!(config.transactions.sweep_interval, Duration::from_secs(10));
    assert_eq!(config.document.as_ref().unwrap().default_collection, "items");
    config.validate().unwrap();
}

#[test]
fn test_fingerprint_tracks_content() {
    let a = kv_data_config();
    let b = kv_data_config();
    assert_eq!(a.fingerprint(), b.fingerprint());

    let mut c = kv_data_config();
    c.retry.max_retries += 1;
    assert_ne!(a.fingerprint(), c.fingerprint());
}
