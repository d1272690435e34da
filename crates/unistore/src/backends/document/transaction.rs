//! Session transactions for the document backend.
//!
//! Each added operation runs immediately inside the session's transaction;
//! nothing is visible to other readers until commit.

use async_trait::async_trait;
use tracing::debug;

use super::client::DocumentSession;
use super::storage::CollectionContext;
use crate::core::{BackendKind, NativeTransaction};
use crate::error::{DataError, DataResult};
use crate::types::TransactionOperation;

/// An open session transaction.
#[derive(Debug)]
pub struct DocumentTransaction {
    ctx: CollectionContext,
    session: Box<dyn DocumentSession>,
    operation_count: usize,
    finished: bool,
}

impl DocumentTransaction {
    pub(crate) fn new(ctx: CollectionContext, session: Box<dyn DocumentSession>) -> Self {
        Self {
            ctx,
            session,
            operation_count: 0,
            finished: false,
        }
    }

    fn ensure_open(&self) -> DataResult<()> {
        if self.finished {
            return Err(DataError::transaction("session transaction already finished")
                .with_backend(BackendKind::Document));
        }
        Ok(())
    }
}

#[async_trait]
impl NativeTransaction for DocumentTransaction {
    async fn add(&mut self, operation: TransactionOperation) -> DataResult<()> {
        self.ensure_open()?;
        operation.validate()?;
        self.ctx
            .apply_in_session(self.session.as_mut(), &operation)
            .await?;
        self.operation_count += 1;
        Ok(())
    }

    async fn commit(&mut self) -> DataResult<()> {
        self.ensure_open()?;
        self.session
            .commit_transaction()
            .await
            .map_err(|e| self.ctx.translate(e))?;
        self.finished = true;
        debug!(
            backend = %BackendKind::Document,
            operations = self.operation_count,
            "Session transaction committed"
        );
        Ok(())
    }

    async fn rollback(&mut self) -> DataResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.session
            .abort_transaction()
            .await
            .map_err(|e| self.ctx.translate(e))
    }

    fn operation_count(&self) -> usize {
        self.operation_count
    }
}
