//! Document adapter configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};

/// Configuration for the document adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Connection string (`mongodb://` or `mongodb+srv://`).
    pub uri: String,

    /// Database name.
    pub database: String,

    /// Collection for keys without a mapped prefix.
    #[serde(default = "default_collection")]
    pub default_collection: String,

    /// Key prefix (text before the first `#`) to collection name.
    #[serde(default)]
    pub collections: BTreeMap<String, String>,

    /// Minimum connection pool size.
    #[serde(default)]
    pub min_pool_size: u32,

    /// Maximum connection pool size.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Whether the deployment supports session transactions.
    #[serde(default = "default_transactions_enabled")]
    pub transactions_enabled: bool,

    /// Connect attempts made by `reconnect`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_collection() -> String {
    "items".to_string()
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_transactions_enabled() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl DocumentConfig {
    /// Creates a configuration with defaults.
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            default_collection: default_collection(),
            collections: BTreeMap::new(),
            min_pool_size: 0,
            max_pool_size: default_max_pool_size(),
            transactions_enabled: default_transactions_enabled(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }

    /// Maps a key prefix to a collection.
    pub fn with_collection(mut self, prefix: impl Into<String>, collection: impl Into<String>) -> Self {
        self.collections.insert(prefix.into(), collection.into());
        self
    }

    /// Enables or disables session transactions.
    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.transactions_enabled = enabled;
        self
    }

    /// Returns the collection for a key namespace.
    pub fn collection_for(&self, namespace: Option<&str>) -> &str {
        namespace
            .and_then(|prefix| self.collections.get(prefix))
            .map(String::as_str)
            .unwrap_or(&self.default_collection)
    }

    /// Returns every collection in scan order: the default first, then the
    /// mapped collections by prefix, without duplicates.
    pub fn all_collections(&self) -> Vec<String> {
        let mut all = vec![self.default_collection.clone()];
        for collection in self.collections.values() {
            if !all.contains(collection) {
                all.push(collection.clone());
            }
        }
        all
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DataResult<()> {
        if self.uri.trim().is_empty() {
            return Err(DataError::configuration("document.uri must not be empty"));
        }
        if !(self.uri.starts_with("mongodb://") || self.uri.starts_with("mongodb+srv://")) {
            return Err(DataError::configuration(
                "document.uri must start with mongodb:// or mongodb+srv://",
            ));
        }
        if self.database.trim().is_empty() {
            return Err(DataError::configuration("document.database must not be empty"));
        }
        if self.default_collection.trim().is_empty() {
            return Err(DataError::configuration(
                "document.default_collection must not be empty",
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(DataError::configuration(format!(
                "document.min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}
