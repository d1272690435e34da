//! Key-value adapter configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};

/// Configuration for the key-value adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueConfig {
    /// Service region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Table holding all items.
    pub table_name: String,

    /// Endpoint override, for local emulators.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Use strongly consistent reads for every `get` and `query`.
    #[serde(default)]
    pub consistent_read: bool,

    /// Store the partition value as the sort value when a key has no sort
    /// component, so single-component keys address a composite-key table.
    #[serde(default = "default_mirror_partition_key")]
    pub mirror_partition_key: bool,

    /// Connect attempts made by `reconnect`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_mirror_partition_key() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    1
}

impl KeyValueConfig {
    /// Creates a configuration for a table with defaults.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            region: default_region(),
            table_name: table_name.into(),
            endpoint_url: None,
            consistent_read: false,
            mirror_partition_key: default_mirror_partition_key(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }

    /// Sets the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the endpoint override.
    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DataResult<()> {
        if self.table_name.trim().is_empty() {
            return Err(DataError::configuration("keyvalue.table_name must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(DataError::configuration("keyvalue.region must not be empty"));
        }
        if let Some(endpoint) = &self.endpoint_url {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(DataError::configuration(format!(
                    "keyvalue.endpoint_url must use http or https: {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}
