//! Native transactions with timeout, retry and rollback handling.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::Transaction;
use crate::core::{
    BackendKind, NativeTransaction, TransactionContext, TransactionOptions, TransactionState,
    TransactionSummary,
};
use crate::error::{DataError, DataResult};
use crate::types::TransactionOperation;

#[derive(Debug)]
struct Inner {
    ctx: TransactionContext,
    native: Box<dyn NativeTransaction>,
}

impl Inner {
    async fn force_rollback(&mut self, reason: &str) {
        if self.ctx.state != TransactionState::Active {
            return;
        }
        warn!(
            backend = %self.ctx.backend,
            transaction_id = %self.ctx.id,
            reason,
            "Forcing transaction rollback"
        );
        if let Err(e) = self.native.rollback().await {
            error!(
                backend = %self.ctx.backend,
                transaction_id = %self.ctx.id,
                error = %e,
                "Native rollback failed"
            );
        }
        self.ctx.state = TransactionState::RolledBack;
        self.ctx.last_error = Some(
            DataError::transaction(format!("transaction {} {}", self.ctx.id, reason))
                .with_backend(self.ctx.backend),
        );
        if let Some(callback) = self.ctx.options.on_rollback.clone() {
            callback(&self.ctx);
        }
    }
}

/// A backend-native transaction with lifecycle management.
///
/// - a timer force-rolls-back the transaction when `timeout` elapses
/// - `commit` retries retryable failures up to `max_retries`, waiting
///   `retry_delay` and calling `on_retry` before each retry
/// - a failed commit attempts a rollback and leaves the transaction `Failed`
#[derive(Debug, Clone)]
pub struct EnhancedTransaction {
    id: String,
    backend: BackendKind,
    inner: Arc<Mutex<Inner>>,
    timer: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl EnhancedTransaction {
    /// Wraps a native transaction and arms its timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        backend: BackendKind,
        native: Box<dyn NativeTransaction>,
        options: TransactionOptions,
    ) -> Self {
        let timeout = options.timeout;
        let ctx = TransactionContext::new(backend, options);
        let tx = Self {
            id: ctx.id.clone(),
            backend,
            inner: Arc::new(Mutex::new(Inner { ctx, native })),
            timer: Arc::new(parking_lot::Mutex::new(None)),
        };

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&tx.inner);
        let handle = tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .await
                    .force_rollback(&format!("timed out after {:?}", timeout))
                    .await;
            }
        });
        *tx.timer.lock() = Some(handle);
        tx
    }

    fn disarm(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transaction for EnhancedTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn backend_kind(&self) -> BackendKind {
        self.backend
    }

    fn is_fallback(&self) -> bool {
        false
    }

    async fn state(&self) -> TransactionState {
        self.inner.lock().await.ctx.state
    }

    async fn summary(&self) -> TransactionSummary {
        self.inner.lock().await.ctx.summary()
    }

    async fn add(&self, operation: TransactionOperation) -> DataResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ctx.ensure_active()?;
        inner.native.add(operation.clone()).await?;
        inner.ctx.operations.push(operation);
        Ok(())
    }

    async fn commit(&self) -> DataResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ctx.ensure_active()?;

        let max_retries = inner.ctx.options.max_retries;
        let retry_delay = inner.ctx.options.retry_delay;
        let mut attempt = 0u32;
        loop {
            match inner.native.commit().await {
                Ok(()) => {
                    inner.ctx.state = TransactionState::Committed;
                    self.disarm();
                    info!(
                        backend = %self.backend,
                        transaction_id = %self.id,
                        operations = inner.ctx.operations.len(),
                        retries = attempt,
                        "Transaction committed"
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    inner.ctx.retry_count = attempt;
                    if let Some(callback) = inner.ctx.options.on_retry.clone() {
                        callback(attempt, &e);
                    }
                    warn!(
                        backend = %self.backend,
                        transaction_id = %self.id,
                        attempt,
                        max_retries,
                        error = %e,
                        "Retrying transaction commit"
                    );
                    inner.ctx.last_error = Some(e);
                    sleep(retry_delay).await;
                }
                Err(e) => {
                    if let Err(rollback_error) = inner.native.rollback().await {
                        error!(
                            backend = %self.backend,
                            transaction_id = %self.id,
                            error = %rollback_error,
                            "Rollback after failed commit also failed"
                        );
                    }
                    inner.ctx.state = TransactionState::Failed;
                    inner.ctx.last_error = Some(e.detached());
                    self.disarm();
                    return Err(e);
                }
            }
        }
    }

    async fn rollback(&self) -> DataResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.ctx.state {
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Active => {}
            _ => inner.ctx.ensure_active()?,
        }
        self.disarm();
        if let Some(callback) = inner.ctx.options.on_rollback.clone() {
            callback(&inner.ctx);
        }
        let result = inner.native.rollback().await;
        inner.ctx.state = TransactionState::RolledBack;
        info!(
            backend = %self.backend,
            transaction_id = %self.id,
            "Transaction rolled back"
        );
        result
    }

    async fn expire(&self, reason: &str) {
        self.disarm();
        self.inner.lock().await.force_rollback(reason).await;
    }
}
