//! Transaction primitives shared by adapters and the transaction manager.
//!
//! Adapters expose backend atomicity through [`NativeTransaction`]. The
//! [`crate::transaction`] module wraps native transactions with timeout,
//! retry and rollback handling, or emulates them when a backend cannot.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::backend::BackendKind;
use crate::error::{DataError, DataResult};
use crate::types::TransactionOperation;

/// Callback invoked before each commit retry with the attempt number and the
/// error that triggered it.
pub type RetryCallback = Arc<dyn Fn(u32, &DataError) + Send + Sync>;

/// Callback invoked when a transaction rolls back.
pub type RollbackCallback = Arc<dyn Fn(&TransactionContext) + Send + Sync>;

/// Options for starting a transaction.
#[derive(Clone)]
pub struct TransactionOptions {
    /// Maximum lifetime before a forced rollback.
    pub timeout: Duration,
    /// Commit retries on retryable errors.
    pub max_retries: u32,
    /// Delay between commit retries.
    pub retry_delay: Duration,
    /// Emulate the transaction when native creation fails.
    pub enable_fallback: bool,
    /// Called before each commit retry.
    pub on_retry: Option<RetryCallback>,
    /// Called on rollback.
    pub on_rollback: Option<RollbackCallback>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            enable_fallback: true,
            on_retry: None,
            on_rollback: None,
        }
    }
}

impl fmt::Debug for TransactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOptions")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("enable_fallback", &self.enable_fallback)
            .field("on_retry", &self.on_retry.is_some())
            .field("on_rollback", &self.on_rollback.is_some())
            .finish()
    }
}

impl TransactionOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the commit retry count.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay between commit retries.
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Enables or disables the fallback path.
    pub fn enable_fallback(mut self, enable: bool) -> Self {
        self.enable_fallback = enable;
        self
    }

    /// Sets the retry callback.
    pub fn on_retry(mut self, callback: impl Fn(u32, &DataError) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Sets the rollback callback.
    pub fn on_rollback(
        mut self,
        callback: impl Fn(&TransactionContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_rollback = Some(Arc::new(callback));
        self
    }
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Committed.
    Committed,
    /// Rolled back, explicitly or by timeout.
    RolledBack,
    /// Commit failed.
    Failed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled_back"),
            TransactionState::Failed => write!(f, "failed"),
        }
    }
}

/// Bookkeeping for one transaction.
#[derive(Debug)]
pub struct TransactionContext {
    /// Unique id.
    pub id: String,
    /// Backend the transaction targets.
    pub backend: BackendKind,
    /// When the transaction began.
    pub started_at: DateTime<Utc>,
    /// Current state.
    pub state: TransactionState,
    /// Operations in the order they were added.
    pub operations: Vec<TransactionOperation>,
    /// Options in effect.
    pub options: TransactionOptions,
    /// Commit retries performed.
    pub retry_count: u32,
    /// Most recent error.
    pub last_error: Option<DataError>,
}

impl TransactionContext {
    /// Creates an active context with a fresh id.
    pub fn new(backend: BackendKind, options: TransactionOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            backend,
            started_at: Utc::now(),
            state: TransactionState::Active,
            operations: Vec::new(),
            options,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Fails with [`crate::ErrorKind::Transaction`] unless active.
    pub fn ensure_active(&self) -> DataResult<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(DataError::transaction(format!(
                "transaction {} is not active (state: {})",
                self.id, self.state
            ))
            .with_backend(self.backend))
        }
    }

    /// Returns a summary of the context.
    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id.clone(),
            backend: self.backend,
            state: self.state,
            started_at: self.started_at,
            operation_count: self.operations.len(),
            retry_count: self.retry_count,
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }
}

/// A snapshot of a transaction's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Unique id.
    pub id: String,
    /// Backend.
    pub backend: BackendKind,
    /// State.
    pub state: TransactionState,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Number of operations added.
    pub operation_count: usize,
    /// Commit retries performed.
    pub retry_count: u32,
    /// Most recent error message.
    pub last_error: Option<String>,
}

/// A backend-native multi-item transaction.
///
/// Implementations must allow `commit` to be called again after a retryable
/// failure.
#[async_trait]
pub trait NativeTransaction: Send + Sync + fmt::Debug {
    /// Adds an operation.
    async fn add(&mut self, operation: TransactionOperation) -> DataResult<()>;

    /// Commits all operations atomically.
    async fn commit(&mut self) -> DataResult<()>;

    /// Discards all operations.
    async fn rollback(&mut self) -> DataResult<()>;

    /// Returns the number of operations added.
    fn operation_count(&self) -> usize;
}
