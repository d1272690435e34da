//! Provider-agnostic data access over partitioned key-value and document stores.
//!
//! Application code programs against one [`DataProvider`] trait. Adapters
//! compile the unified model (keys, conditions, queries, updates,
//! transaction operations) into each backend's native protocol, translate
//! native failures into one error taxonomy, retry transient failures, and
//! record operation metrics.
//!
//! # Backend Features
//!
//! The production native clients are behind feature flags:
//!
//! ```toml
//! [dependencies]
//! unistore = { version = "0.1", features = ["dynamodb"] }
//! ```
//!
//! - `dynamodb` - key-value backend over the AWS SDK
//! - `mongodb` - document backend over the official driver
//!
//! Without either feature the adapters still build over any client
//! implementing [`backends::keyvalue::KeyValueApi`] or
//! [`backends::document::DocumentApi`].
//!
//! # Architecture
//!
//! - [`types`] - the unified data model
//! - [`error`] - [`DataError`] and the native error capture type
//! - [`translator`] - per-backend native error translators
//! - [`core`] - the provider trait, connection manager, resilience and metrics
//! - [`backends`] - key-value and document adapters
//! - [`transaction`] - native and emulated multi-item transactions
//! - [`config`] - configuration and the adapter factory
//! - [`migration`] - batch copy between adapters
//!
//! # Quick Start
//!
//! ```ignore
//! use unistore::config::{DataConfig, ProviderFactory};
//! use unistore::types::{DatabaseKey, GetOptions, PutOptions};
//! use serde_json::json;
//!
//! let config = DataConfig::from_env()?;
//! let factory = ProviderFactory::new();
//! let provider = factory.create(&config).await?;
//!
//! let item = json!({"primary": "user#1", "sort": "profile", "name": "John"});
//! provider.put(item.as_object().cloned().unwrap(), &PutOptions::default()).await?;
//!
//! let key = DatabaseKey::with_sort("user#1", "profile");
//! let stored = provider.get(&key, &GetOptions::default()).await?;
//! ```
//!
//! # Conditions
//!
//! ```
//! use serde_json::json;
//! use unistore::types::{FilterCondition, Item};
//!
//! let condition = FilterCondition::contains("name", "jo");
//! let item: Item = json!({"pk": "user#1", "name": "John"}).as_object().cloned().unwrap();
//! assert!(condition.validate().is_ok());
//! assert!(!condition.matches(&item));
//! assert!(FilterCondition::contains("name", "Jo").matches(&item));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod migration;
pub mod transaction;
pub mod translator;
pub mod types;

pub use error::{DataError, DataResult, ErrorKind, NativeError};
pub use types::{DatabaseKey, Item, KeyValue};

pub use core::{BackendCapability, BackendKind, DataProvider};

pub use config::{DataConfig, ProviderFactory};
pub use migration::{BatchMigrator, MigrationReport};
pub use transaction::{Transaction, TransactionManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
