//! The provider contract.
//!
//! [`DataProvider`] is the single API application code programs against.
//! Implementations validate inputs and connection state before touching the
//! network, translate every native failure, and record a metrics sample for
//! every operation.
//!
//! # Example
//!
//! ```ignore
//! use unistore::core::DataProvider;
//! use unistore::types::{DatabaseKey, GetOptions, PutOptions, UpdateInput};
//! use serde_json::json;
//!
//! async fn rename(provider: &dyn DataProvider) -> unistore::DataResult<()> {
//!     let item = json!({"primary": "user#1", "sort": "profile", "name": "John"});
//!     provider.put(item.as_object().cloned().unwrap(), &PutOptions::default()).await?;
//!
//!     let key = DatabaseKey::with_sort("user#1", "profile");
//!     provider.update(&UpdateInput::new(key.clone()).set("name", "Jane")).await?;
//!
//!     let item = provider.get(&key, &GetOptions::default()).await?;
//!     assert_eq!(item.unwrap()["name"], "Jane");
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::backend::{BackendCapability, BackendKind};
use super::connection::ConnectionEvent;
use super::metrics::MetricsCollector;
use super::transaction::{NativeTransaction, TransactionOptions};
use crate::error::DataResult;
use crate::types::{
    BatchGetOptions, DatabaseKey, DeleteOptions, GetOptions, HealthStatus, Item, NativeCommand,
    Page, PutOptions, QueryInput, ScanInput, TransactionOperation, UpdateInput,
};

/// Provider-agnostic data access.
#[async_trait]
pub trait DataProvider: Send + Sync + std::fmt::Debug {
    /// Returns the backend type.
    fn backend_kind(&self) -> BackendKind;

    /// Returns the capabilities this adapter supports.
    fn capabilities(&self) -> Vec<BackendCapability>;

    /// Returns true if this adapter supports the given capability.
    fn supports(&self, capability: BackendCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Connects and verifies liveness.
    async fn connect(&self) -> DataResult<()>;

    /// Disconnects.
    async fn disconnect(&self) -> DataResult<()>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Probes the backend and reports health.
    async fn health_check(&self) -> DataResult<HealthStatus>;

    /// Reads one item.
    async fn get(&self, key: &DatabaseKey, options: &GetOptions) -> DataResult<Option<Item>>;

    /// Writes a whole item, returning the item as stored.
    async fn put(&self, item: Item, options: &PutOptions) -> DataResult<Item>;

    /// Applies a partial update, returning the updated item.
    async fn update(&self, input: &UpdateInput) -> DataResult<Option<Item>>;

    /// Deletes one item.
    async fn delete(&self, key: &DatabaseKey, options: &DeleteOptions) -> DataResult<()>;

    /// Runs a query. Without a limit, all matching pages are returned.
    async fn query(&self, input: &QueryInput) -> DataResult<Vec<Item>>;

    /// Runs a query and returns one page.
    async fn query_page(&self, input: &QueryInput) -> DataResult<Page>;

    /// Scans and returns one page.
    async fn scan(&self, input: &ScanInput) -> DataResult<Page>;

    /// Reads many items. Missing keys are omitted.
    async fn batch_get(
        &self,
        keys: &[DatabaseKey],
        options: &BatchGetOptions,
    ) -> DataResult<Vec<Item>>;

    /// Starts a native multi-item transaction.
    async fn begin_native_transaction(
        &self,
        options: &TransactionOptions,
    ) -> DataResult<Box<dyn NativeTransaction>>;

    /// Executes operations as one native transaction.
    async fn execute_transaction(&self, operations: Vec<TransactionOperation>) -> DataResult<()>;

    /// Passes a raw command to the native client.
    async fn execute_native(&self, command: NativeCommand) -> DataResult<Value>;

    /// Returns this adapter's metrics collector.
    fn metrics(&self) -> Arc<MetricsCollector>;

    /// Subscribes to connection events.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}
