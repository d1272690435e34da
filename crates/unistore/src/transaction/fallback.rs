//! Emulated transactions for backends without native multi-item atomicity.
//!
//! This is a saga. Operations queue until commit and then run one by one
//! against the adapter. The prior state of each written key is read first;
//! if a later operation fails, the executed ones are undone in reverse order
//! from those snapshots. Readers may observe intermediate states, and a
//! failed compensation leaves the store partially applied.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::Transaction;
use crate::core::{
    BackendKind, DataProvider, TransactionContext, TransactionOptions, TransactionState,
    TransactionSummary,
};
use crate::error::{DataError, DataResult};
use crate::types::{
    DatabaseKey, DeleteOptions, GetOptions, Item, PutOptions, TransactionOperation,
};

/// Undo record for one executed operation.
#[derive(Debug)]
struct Compensation {
    key: DatabaseKey,
    /// Item before the operation ran; `None` if it did not exist.
    snapshot: Option<Item>,
}

/// A compensating (saga) transaction.
#[derive(Debug, Clone)]
pub struct FallbackTransaction {
    id: String,
    backend: BackendKind,
    provider: Arc<dyn DataProvider>,
    ctx: Arc<Mutex<TransactionContext>>,
}

impl FallbackTransaction {
    /// Creates an empty transaction against `provider`.
    pub fn new(provider: Arc<dyn DataProvider>, options: TransactionOptions) -> Self {
        let backend = provider.backend_kind();
        let ctx = TransactionContext::new(backend, options);
        Self {
            id: ctx.id.clone(),
            backend,
            provider,
            ctx: Arc::new(Mutex::new(ctx)),
        }
    }

    async fn snapshot(&self, key: &DatabaseKey) -> DataResult<Option<Item>> {
        self.provider.get(key, &GetOptions::consistent()).await
    }

    async fn apply(&self, operation: &TransactionOperation) -> DataResult<Option<Compensation>> {
        match operation {
            TransactionOperation::Put { item } => {
                let key = DatabaseKey::from_item(item)?;
                let snapshot = self.snapshot(&key).await?;
                self.provider.put(item.clone(), &PutOptions::default()).await?;
                Ok(Some(Compensation { key, snapshot }))
            }
            TransactionOperation::Update(input) => {
                let snapshot = self.snapshot(&input.key).await?;
                self.provider.update(input).await?;
                Ok(Some(Compensation {
                    key: input.key.clone(),
                    snapshot,
                }))
            }
            TransactionOperation::Delete { key } => {
                let snapshot = self.snapshot(key).await?;
                self.provider.delete(key, &DeleteOptions::default()).await?;
                Ok(Some(Compensation {
                    key: key.clone(),
                    snapshot,
                }))
            }
            TransactionOperation::ConditionCheck { key, condition } => {
                match self.snapshot(key).await? {
                    Some(item) if condition.matches_on(&item, self.backend) => Ok(None),
                    Some(_) => Err(DataError::conditional_check_failed(format!(
                        "condition `{} {}` failed for key {}",
                        condition.field, condition.operator, key
                    ))
                    .with_backend(self.backend)),
                    None => Err(DataError::conditional_check_failed(format!(
                        "condition check on missing item {}",
                        key
                    ))
                    .with_backend(self.backend)),
                }
            }
        }
    }

    /// Undoes executed operations in reverse order. Failures are logged and
    /// do not stop the remaining compensations.
    async fn compensate(&self, executed: Vec<Compensation>) {
        for compensation in executed.into_iter().rev() {
            let result = match compensation.snapshot {
                Some(item) => self
                    .provider
                    .put(item, &PutOptions::default())
                    .await
                    .map(|_| ()),
                None => {
                    self.provider
                        .delete(&compensation.key, &DeleteOptions::default())
                        .await
                }
            };
            match result {
                Ok(()) => debug!(
                    backend = %self.backend,
                    transaction_id = %self.id,
                    key = %compensation.key,
                    "Compensated operation"
                ),
                Err(e) => error!(
                    backend = %self.backend,
                    transaction_id = %self.id,
                    key = %compensation.key,
                    error = %e,
                    "Compensation failed"
                ),
            }
        }
    }
}

#[async_trait]
impl Transaction for FallbackTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn backend_kind(&self) -> BackendKind {
        self.backend
    }

    fn is_fallback(&self) -> bool {
        true
    }

    async fn state(&self) -> TransactionState {
        self.ctx.lock().await.state
    }

    async fn summary(&self) -> TransactionSummary {
        self.ctx.lock().await.summary()
    }

    async fn add(&self, operation: TransactionOperation) -> DataResult<()> {
        let mut ctx = self.ctx.lock().await;
        ctx.ensure_active()?;
        operation.validate()?;
        ctx.operations.push(operation);
        Ok(())
    }

    async fn commit(&self) -> DataResult<()> {
        let mut ctx = self.ctx.lock().await;
        ctx.ensure_active()?;

        let operations = ctx.operations.clone();
        let mut executed = Vec::with_capacity(operations.len());
        for (index, operation) in operations.iter().enumerate() {
            match self.apply(operation).await {
                Ok(Some(compensation)) => executed.push(compensation),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        backend = %self.backend,
                        transaction_id = %self.id,
                        failed_index = index,
                        operation = %operation.kind(),
                        compensations = executed.len(),
                        error = %e,
                        "Emulated commit failed, compensating"
                    );
                    self.compensate(executed).await;
                    ctx.state = TransactionState::Failed;
                    ctx.last_error = Some(e.detached());
                    return Err(e);
                }
            }
        }

        ctx.state = TransactionState::Committed;
        info!(
            backend = %self.backend,
            transaction_id = %self.id,
            operations = operations.len(),
            "Emulated transaction committed"
        );
        Ok(())
    }

    async fn rollback(&self) -> DataResult<()> {
        let mut ctx = self.ctx.lock().await;
        match ctx.state {
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Active => {}
            _ => ctx.ensure_active()?,
        }
        if let Some(callback) = ctx.options.on_rollback.clone() {
            callback(&*ctx);
        }
        // Nothing has been applied before commit.
        ctx.state = TransactionState::RolledBack;
        info!(
            backend = %self.backend,
            transaction_id = %self.id,
            "Transaction rolled back"
        );
        Ok(())
    }

    async fn expire(&self, reason: &str) {
        let mut ctx = self.ctx.lock().await;
        if ctx.state != TransactionState::Active {
            return;
        }
        warn!(
            backend = %self.backend,
            transaction_id = %self.id,
            reason,
            "Discarding emulated transaction"
        );
        ctx.state = TransactionState::RolledBack;
        ctx.last_error = Some(
            DataError::transaction(format!("transaction {} {}", self.id, reason))
                .with_backend(self.backend),
        );
        if let Some(callback) = ctx.options.on_rollback.clone() {
            callback(&*ctx);
        }
    }
}
