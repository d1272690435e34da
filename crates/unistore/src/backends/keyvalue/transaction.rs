//! Buffered native transactions for the key-value backend.
//!
//! Operations are held in memory and sent as one multi-item commit. The
//! idempotency token is fixed at creation so a retried commit cannot apply
//! twice.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::storage::TableContext;
use crate::core::{BackendKind, NativeTransaction};
use crate::error::{DataError, DataResult};
use crate::types::TransactionOperation;

/// A buffered key-value transaction.
#[derive(Debug)]
pub struct KeyValueTransaction {
    ctx: TableContext,
    operations: Vec<TransactionOperation>,
    token: String,
    finished: bool,
}

impl KeyValueTransaction {
    pub(crate) fn new(ctx: TableContext) -> Self {
        Self {
            ctx,
            operations: Vec::new(),
            token: Uuid::new_v4().to_string(),
            finished: false,
        }
    }

    fn ensure_open(&self) -> DataResult<()> {
        if self.finished {
            return Err(DataError::transaction("native transaction already finished")
                .with_backend(BackendKind::KeyValue));
        }
        Ok(())
    }
}

#[async_trait]
impl NativeTransaction for KeyValueTransaction {
    async fn add(&mut self, operation: TransactionOperation) -> DataResult<()> {
        self.ensure_open()?;
        operation.validate()?;
        self.operations.push(operation);
        Ok(())
    }

    async fn commit(&mut self) -> DataResult<()> {
        self.ensure_open()?;
        let request = self.ctx.transact_request(&self.operations, &self.token).await?;
        self.ctx.transact(request).await?;
        self.finished = true;
        debug!(
            backend = %BackendKind::KeyValue,
            operations = self.operations.len(),
            "Native transaction committed"
        );
        Ok(())
    }

    async fn rollback(&mut self) -> DataResult<()> {
        // Nothing was sent; dropping the buffer is the rollback.
        self.operations.clear();
        self.finished = true;
        Ok(())
    }

    fn operation_count(&self) -> usize {
        self.operations.len()
    }
}
