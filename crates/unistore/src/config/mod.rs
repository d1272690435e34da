//! Configuration for adapters, retries, metrics, transactions and migration.
//!
//! [`DataConfig`] deserializes with serde (durations in humantime form, e.g.
//! `"30s"`) or loads from `UNISTORE_*` environment variables through
//! [`DataConfig::from_env`].
//!
//! # Example
//!
//! ```
//! use unistore::config::DataConfig;
//! use unistore::core::BackendKind;
//!
//! let config: DataConfig = serde_json::from_str(r#"{
//!     "provider": "keyvalue",
//!     "keyvalue": { "table_name": "app-items" },
//!     "transactions": { "default_timeout": "10s" }
//! }"#).unwrap();
//!
//! assert_eq!(config.provider, BackendKind::KeyValue);
//! assert!(config.validate().is_ok());
//! ```

mod factory;

pub use factory::{ClientConnector, NativeConnector, ProviderFactory};

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backends::AdapterSettings;
use crate::backends::document::DocumentConfig;
use crate::backends::keyvalue::KeyValueConfig;
use crate::core::{BackendKind, MetricsConfig, RetryConfig};
use crate::error::{DataError, DataResult};
use crate::transaction::TransactionManagerConfig;
use crate::translator::TranslatorRegistry;

/// Batch-copy migration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Run the copy at all.
    #[serde(default)]
    pub enabled: bool,

    /// Items per scanned page.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Re-read every copied key from the target afterwards.
    #[serde(default = "default_validate_after_migration")]
    pub validate_after_migration: bool,
}

fn default_batch_size() -> u32 {
    100
}

fn default_validate_after_migration() -> bool {
    true
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_batch_size(),
            validate_after_migration: default_validate_after_migration(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Active backend.
    pub provider: BackendKind,

    /// Key-value adapter settings; required when `provider` is `keyvalue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyvalue: Option<KeyValueConfig>,

    /// Document adapter settings; required when `provider` is `document`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentConfig>,

    /// Migration settings.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Retry policy for native calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Transaction defaults.
    #[serde(default)]
    pub transactions: TransactionManagerConfig,
}

impl DataConfig {
    /// Creates a key-value configuration with defaults.
    pub fn key_value(config: KeyValueConfig) -> Self {
        Self::with_provider(BackendKind::KeyValue, Some(config), None)
    }

    /// Creates a document configuration with defaults.
    pub fn document(config: DocumentConfig) -> Self {
        Self::with_provider(BackendKind::Document, None, Some(config))
    }

    fn with_provider(
        provider: BackendKind,
        keyvalue: Option<KeyValueConfig>,
        document: Option<DocumentConfig>,
    ) -> Self {
        Self {
            provider,
            keyvalue,
            document,
            migration: MigrationConfig::default(),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
            transactions: TransactionManagerConfig::default(),
        }
    }

    /// Loads the configuration from `UNISTORE_*` environment variables.
    pub fn from_env() -> DataResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration from a variable lookup.
    ///
    /// A backend block is built when it is the selected provider or when any
    /// of its variables is set. The result is not validated.
    pub fn from_lookup<F>(lookup: F) -> DataResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider_name = get("UNISTORE_PROVIDER")
            .ok_or_else(|| DataError::configuration("UNISTORE_PROVIDER is not set"))?;
        let provider = BackendKind::parse(&provider_name).ok_or_else(|| {
            DataError::configuration(format!("unknown provider `{}`", provider_name))
        })?;

        let keyvalue = if provider == BackendKind::KeyValue || get("UNISTORE_KV_TABLE").is_some() {
            let mut kv = KeyValueConfig::new(get("UNISTORE_KV_TABLE").unwrap_or_default());
            if let Some(region) = get("UNISTORE_KV_REGION") {
                kv.region = region;
            }
            kv.endpoint_url = get("UNISTORE_KV_ENDPOINT");
            if let Some(value) = get("UNISTORE_KV_CONSISTENT_READ") {
                kv.consistent_read = parse_bool("UNISTORE_KV_CONSISTENT_READ", &value)?;
            }
            Some(kv)
        } else {
            None
        };

        let document = if provider == BackendKind::Document || get("UNISTORE_DOC_URI").is_some() {
            let mut doc = DocumentConfig::new(
                get("UNISTORE_DOC_URI").unwrap_or_default(),
                get("UNISTORE_DOC_DATABASE").unwrap_or_default(),
            );
            if let Some(collection) = get("UNISTORE_DOC_COLLECTION") {
                doc.default_collection = collection;
            }
            if let Some(map) = get("UNISTORE_DOC_COLLECTIONS") {
                doc.collections = parse_collection_map(&map)?;
            }
            if let Some(value) = get("UNISTORE_DOC_MIN_POOL") {
                doc.min_pool_size = parse_number("UNISTORE_DOC_MIN_POOL", &value)?;
            }
            if let Some(value) = get("UNISTORE_DOC_MAX_POOL") {
                doc.max_pool_size = parse_number("UNISTORE_DOC_MAX_POOL", &value)?;
            }
            if let Some(value) = get("UNISTORE_DOC_TRANSACTIONS") {
                doc.transactions_enabled = parse_bool("UNISTORE_DOC_TRANSACTIONS", &value)?;
            }
            Some(doc)
        } else {
            None
        };

        let mut config = Self::with_provider(provider, keyvalue, document);
        if let Some(value) = get("UNISTORE_MIGRATION_ENABLED") {
            config.migration.enabled = parse_bool("UNISTORE_MIGRATION_ENABLED", &value)?;
        }
        if let Some(value) = get("UNISTORE_MIGRATION_BATCH_SIZE") {
            config.migration.batch_size = parse_number("UNISTORE_MIGRATION_BATCH_SIZE", &value)?;
        }
        if let Some(value) = get("UNISTORE_MIGRATION_VALIDATE") {
            config.migration.validate_after_migration =
                parse_bool("UNISTORE_MIGRATION_VALIDATE", &value)?;
        }
        if let Some(value) = get("UNISTORE_RETRY_MAX") {
            config.retry.max_retries = parse_number("UNISTORE_RETRY_MAX", &value)?;
        }
        if let Some(value) = get("UNISTORE_TX_TIMEOUT") {
            config.transactions.default_timeout =
                humantime::parse_duration(&value).map_err(|e| {
                    DataError::configuration(format!("UNISTORE_TX_TIMEOUT: {}", e))
                })?;
        }
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DataResult<()> {
        match self.provider {
            BackendKind::KeyValue => self
                .keyvalue
                .as_ref()
                .ok_or_else(|| {
                    DataError::configuration("provider is keyvalue but no keyvalue block is set")
                })?
                .validate()?,
            BackendKind::Document => self
                .document
                .as_ref()
                .ok_or_else(|| {
                    DataError::configuration("provider is document but no document block is set")
                })?
                .validate()?,
        }
        if self.migration.batch_size == 0 {
            return Err(DataError::configuration("migration.batch_size must be positive"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(DataError::configuration(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Returns a stable identity for adapter caching.
    pub fn fingerprint(&self) -> String {
        // Value maps are ordered, so equal configurations serialize equally.
        serde_json::to_value(self)
            .map(|value| value.to_string())
            .unwrap_or_else(|_| format!("{:?}", self))
    }

    /// Returns adapter settings carrying this configuration's retry and
    /// metrics sections.
    pub fn adapter_settings(&self, translators: Arc<TranslatorRegistry>) -> AdapterSettings {
        AdapterSettings {
            translators,
            retry: self.retry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> DataResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(DataError::configuration(format!(
            "{}: expected a boolean, got `{}`",
            name, other
        ))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> DataResult<T> {
    value.trim().parse().map_err(|_| {
        DataError::configuration(format!("{}: expected a number, got `{}`", name, value))
    })
}

fn parse_collection_map(
    value: &str,
) -> DataResult<std::collections::BTreeMap<String, String>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (prefix, collection) = entry.split_once('=').ok_or_else(|| {
                DataError::configuration(format!(
                    "UNISTORE_DOC_COLLECTIONS: expected prefix=collection, got `{}`",
                    entry
                ))
            })?;
            Ok((prefix.trim().to_string(), collection.trim().to_string()))
        })
        .collect()
}

/// Serde module for Duration with humantime format.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_key_value() {
        let config = DataConfig::from_lookup(lookup(&[
            ("UNISTORE_PROVIDER", "dynamodb"),
            ("UNISTORE_KV_TABLE", "app-items"),
            ("UNISTORE_KV_ENDPOINT", "http://localhost:8000"),
            ("UNISTORE_KV_CONSISTENT_READ", "true"),
            ("UNISTORE_TX_TIMEOUT", "10s"),
        ]))
        .unwrap();
        assert_eq!(config.provider, BackendKind::KeyValue);
        let kv = config.keyvalue.as_ref().unwrap();
        assert_eq!(kv.table_name, "app-items");
        assert_eq!(kv.region, "us-east-1");
        assert!(kv.consistent_read);
        assert!(config.document.is_none());
        assert_eq!(config.transactions.default_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_document() {
        let config = DataConfig::from_lookup(lookup(&[
            ("UNISTORE_PROVIDER", "mongodb"),
            ("UNISTORE_DOC_URI", "mongodb://localhost:27017"),
            ("UNISTORE_DOC_DATABASE", "app"),
            ("UNISTORE_DOC_COLLECTIONS", "user=users, order=orders"),
            ("UNISTORE_DOC_MAX_POOL", "20"),
            ("UNISTORE_MIGRATION_BATCH_SIZE", "25"),
        ]))
        .unwrap();
        let doc = config.document.as_ref().unwrap();
        assert_eq!(doc.collections.get("user").map(String::as_str), Some("users"));
        assert_eq!(doc.max_pool_size, 20);
        assert_eq!(config.migration.batch_size, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_provider_is_configuration_error() {
        let err = DataConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = DataConfig::from_lookup(lookup(&[("UNISTORE_PROVIDER", "postgres")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = DataConfig::from_lookup(lookup(&[
            ("UNISTORE_PROVIDER", "keyvalue"),
            ("UNISTORE_RETRY_MAX", "many"),
        ]))
        .unwrap_err();
        assert!(err.message().contains("UNISTORE_RETRY_MAX"));

        let config = DataConfig::from_lookup(lookup(&[("UNISTORE_PROVIDER", "keyvalue")])).unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_block_and_zero_batch() {
        let mut config = DataConfig::key_value(KeyValueConfig::new("items"));
        config.provider = BackendKind::Document;
        assert!(config.validate().is_err());

        let mut config = DataConfig::key_value(KeyValueConfig::new("items"));
        config.migration.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = DataConfig::key_value(KeyValueConfig::new("items"));
        let b = DataConfig::key_value(KeyValueConfig::new("items"));
        let c = DataConfig::key_value(KeyValueConfig::new("other"));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_humantime_durations_round_trip() {
        let config = DataConfig::key_value(KeyValueConfig::new("items"));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["transactions"]["default_timeout"], "30s");
        assert_eq!(json["retry"]["initial_delay"], "100ms");
    }
}
