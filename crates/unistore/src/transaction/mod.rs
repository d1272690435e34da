//! Multi-item transactions.
//!
//! [`TransactionManager::begin`] hands out a [`Transaction`]. When the adapter
//! supports native multi-item atomicity the result is an
//! [`EnhancedTransaction`], which adds a timeout, commit retries and
//! automatic rollback on top of the backend's own transaction. Otherwise (or
//! when native creation fails and fallback is enabled) it is a
//! [`FallbackTransaction`]: a saga that applies operations one by one and
//! compensates on failure. A fallback commit is not atomic.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use unistore::transaction::TransactionManager;
//! use unistore::core::TransactionOptions;
//! use unistore::types::{DatabaseKey, UpdateInput};
//!
//! let manager = TransactionManager::new(provider.clone());
//! let tx = manager.begin(TransactionOptions::new()).await?;
//! tx.put(order).await?;
//! tx.update(UpdateInput::new(DatabaseKey::new("stock#42")).increment("count", -1)).await?;
//! tx.commit().await?;
//! ```

mod enhanced;
mod fallback;
mod manager;

pub use enhanced::EnhancedTransaction;
pub use fallback::FallbackTransaction;
pub use manager::{TransactionManager, TransactionManagerConfig};

use async_trait::async_trait;

use crate::core::{BackendKind, TransactionState, TransactionSummary};
use crate::error::DataResult;
use crate::types::{DatabaseKey, FilterCondition, Item, TransactionOperation, UpdateInput};

/// A transaction handle.
///
/// Handles are shared: the manager keeps its own reference for sweeping, and
/// every method takes `&self`.
#[async_trait]
pub trait Transaction: Send + Sync + std::fmt::Debug {
    /// Unique id.
    fn id(&self) -> &str;

    /// Backend the transaction runs against.
    fn backend_kind(&self) -> BackendKind;

    /// True for an emulated (saga) transaction.
    fn is_fallback(&self) -> bool;

    /// Current state.
    async fn state(&self) -> TransactionState;

    /// Snapshot of the context.
    async fn summary(&self) -> TransactionSummary;

    /// Adds an operation. Fails unless the transaction is active.
    async fn add(&self, operation: TransactionOperation) -> DataResult<()>;

    /// Adds a put.
    async fn put(&self, item: Item) -> DataResult<()> {
        self.add(TransactionOperation::Put { item }).await
    }

    /// Adds an update.
    async fn update(&self, input: UpdateInput) -> DataResult<()> {
        self.add(TransactionOperation::Update(input)).await
    }

    /// Adds a delete.
    async fn delete(&self, key: DatabaseKey) -> DataResult<()> {
        self.add(TransactionOperation::Delete { key }).await
    }

    /// Adds a check that must hold at commit.
    async fn condition_check(&self, key: DatabaseKey, condition: FilterCondition) -> DataResult<()> {
        self.add(TransactionOperation::ConditionCheck { key, condition })
            .await
    }

    /// Commits.
    async fn commit(&self) -> DataResult<()>;

    /// Rolls back. Idempotent once rolled back.
    async fn rollback(&self) -> DataResult<()>;

    /// Rolls back an active transaction and records a transaction error with
    /// `reason`. Does nothing once the transaction has finished.
    async fn expire(&self, reason: &str);
}
