//! Provider adapters.
//!
//! Each adapter implements [`crate::core::DataProvider`] over an injectable
//! native client:
//!
//! - [`keyvalue`] - partitioned key-value store (`dynamodb` feature for the
//!   production client)
//! - [`document`] - document store (`mongodb` feature for the production
//!   client)

pub mod document;
pub mod keyvalue;

use std::sync::Arc;

use crate::core::{MetricsConfig, RetryConfig};
use crate::translator::TranslatorRegistry;

/// Settings shared by both adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Error translators.
    pub translators: Arc<TranslatorRegistry>,
    /// Retry policy for native calls.
    pub retry: RetryConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            translators: Arc::new(TranslatorRegistry::with_defaults()),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}
