//! Transaction creation, tracking and expiry sweeping.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{EnhancedTransaction, FallbackTransaction, Transaction};
use crate::core::{
    BackendCapability, BackendKind, DataProvider, TransactionOptions, TransactionState,
    TransactionSummary,
};
use crate::error::{DataError, DataResult};
use crate::types::TransactionOperation;

/// Defaults for transactions begun through a [`TransactionManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionManagerConfig {
    /// Lifetime before a forced rollback.
    #[serde(default = "default_timeout", with = "crate::config::humantime_serde")]
    pub default_timeout: Duration,

    /// Commit retries on retryable errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between commit retries.
    #[serde(default = "default_retry_delay", with = "crate::config::humantime_serde")]
    pub retry_delay: Duration,

    /// Emulate transactions when native ones are unavailable.
    #[serde(default = "default_enable_fallback")]
    pub enable_fallback: bool,

    /// How often the background sweep runs.
    #[serde(default = "default_sweep_interval", with = "crate::config::humantime_serde")]
    pub sweep_interval: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_enable_fallback() -> bool {
    true
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            enable_fallback: default_enable_fallback(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl TransactionManagerConfig {
    /// Returns transaction options carrying these defaults.
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions::new()
            .timeout(self.default_timeout)
            .max_retries(self.max_retries)
            .retry_delay(self.retry_delay)
            .enable_fallback(self.enable_fallback)
    }
}

#[derive(Debug)]
struct Tracked {
    handle: Arc<dyn Transaction>,
    started: Instant,
    timeout: Duration,
}

type Registry = Arc<Mutex<HashMap<String, Tracked>>>;

/// Handle given out by the manager. It leaves the registry as soon as a
/// commit, rollback or expiry finishes the transaction.
#[derive(Debug)]
struct ManagedTransaction {
    inner: Arc<dyn Transaction>,
    registry: Weak<Mutex<HashMap<String, Tracked>>>,
}

impl ManagedTransaction {
    async fn release_if_finished(&self) {
        if self.inner.state().await == TransactionState::Active {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(self.inner.id());
        }
    }
}

#[async_trait]
impl Transaction for ManagedTransaction {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn backend_kind(&self) -> BackendKind {
        self.inner.backend_kind()
    }

    fn is_fallback(&self) -> bool {
        self.inner.is_fallback()
    }

    async fn state(&self) -> TransactionState {
        self.inner.state().await
    }

    async fn summary(&self) -> TransactionSummary {
        self.inner.summary().await
    }

    async fn add(&self, operation: TransactionOperation) -> DataResult<()> {
        self.inner.add(operation).await
    }

    async fn commit(&self) -> DataResult<()> {
        let result = self.inner.commit().await;
        self.release_if_finished().await;
        result
    }

    async fn rollback(&self) -> DataResult<()> {
        let result = self.inner.rollback().await;
        self.release_if_finished().await;
        result
    }

    async fn expire(&self, reason: &str) {
        self.inner.expire(reason).await;
        self.release_if_finished().await;
    }
}

/// Begins transactions against one adapter and tracks them until they
/// finish or expire.
///
/// Created inside a tokio runtime, the manager starts its periodic sweep
/// immediately; the sweep stops on [`shutdown`](Self::shutdown) or drop.
/// Transactions finished by their own timeout leave the registry at the
/// next sweep.
#[derive(Debug)]
pub struct TransactionManager {
    provider: Arc<dyn DataProvider>,
    config: TransactionManagerConfig,
    registry: Registry,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionManager {
    /// Creates a manager with default settings.
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self::with_config(provider, TransactionManagerConfig::default())
    }

    /// Creates a manager with explicit defaults.
    pub fn with_config(provider: Arc<dyn DataProvider>, config: TransactionManagerConfig) -> Self {
        let manager = Self {
            provider,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            manager.start_cleanup();
        }
        manager
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    /// Begins a transaction with the configured defaults.
    pub async fn begin_default(&self) -> DataResult<Box<dyn Transaction>> {
        self.begin(self.config.options()).await
    }

    /// Begins a transaction.
    ///
    /// A native transaction is used when the adapter supports one. If the
    /// adapter lacks native support, or creating the native transaction
    /// fails, an emulated transaction is returned when
    /// `options.enable_fallback` is set; otherwise the failure is returned.
    pub async fn begin(&self, options: TransactionOptions) -> DataResult<Box<dyn Transaction>> {
        let backend = self.provider.backend_kind();
        let timeout = options.timeout;

        if self.provider.supports(BackendCapability::NativeTransactions) {
            let native = self.provider.begin_native_transaction(&options).await;
            match native {
                Ok(native) => {
                    let tx = EnhancedTransaction::new(backend, native, options);
                    debug!(backend = %backend, transaction_id = %tx.id(), "Began native transaction");
                    return Ok(self.track(Arc::new(tx), timeout));
                }
                Err(e) if options.enable_fallback => {
                    warn!(
                        backend = %backend,
                        error = %e,
                        "Native transaction unavailable, using emulated transaction"
                    );
                }
                Err(e) => return Err(e),
            }
        } else if !options.enable_fallback {
            return Err(DataError::transaction(
                "backend has no native transactions and fallback is disabled",
            )
            .with_backend(backend));
        }

        let tx = FallbackTransaction::new(self.provider.clone(), options);
        debug!(backend = %backend, transaction_id = %tx.id(), "Began emulated transaction");
        Ok(self.track(Arc::new(tx), timeout))
    }

    /// Begins a transaction, adds `operations` and commits.
    ///
    /// The transaction is rolled back if any operation cannot be added.
    pub async fn execute(
        &self,
        operations: Vec<TransactionOperation>,
        options: TransactionOptions,
    ) -> DataResult<()> {
        let tx = self.begin(options).await?;
        for operation in operations {
            if let Err(e) = tx.add(operation).await {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(
                        transaction_id = %tx.id(),
                        error = %rollback_error,
                        "Rollback after rejected operation failed"
                    );
                }
                return Err(e);
            }
        }
        tx.commit().await
    }

    fn track(&self, handle: Arc<dyn Transaction>, timeout: Duration) -> Box<dyn Transaction> {
        self.registry.lock().insert(
            handle.id().to_string(),
            Tracked {
                handle: handle.clone(),
                started: Instant::now(),
                timeout,
            },
        );
        Box::new(ManagedTransaction {
            inner: handle,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Returns the number of tracked transactions still active.
    pub async fn active_count(&self) -> usize {
        let handles: Vec<Arc<dyn Transaction>> = self
            .registry
            .lock()
            .values()
            .map(|t| t.handle.clone())
            .collect();
        let mut active = 0;
        for handle in handles {
            if handle.state().await == TransactionState::Active {
                active += 1;
            }
        }
        active
    }

    /// Returns the number of transactions in the registry.
    pub fn tracked_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Force-rolls-back and discards transactions older than twice their
    /// timeout, and drops finished ones. Returns how many were expired.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.registry).await
    }

    /// Starts the periodic sweep, replacing a running one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_cleanup(&self) {
        let period = self.config.sweep_interval;
        if period.is_zero() {
            warn!("Transaction sweep disabled by a zero interval");
            return;
        }
        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                sweep(&registry).await;
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Returns true while the periodic sweep runs.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            debug!("Transaction sweeper stopped");
        }
    }

    /// Stops the sweep and rolls back every tracked active transaction.
    pub async fn shutdown(&self) {
        self.stop_sweeper();
        let tracked: Vec<Tracked> = self.registry.lock().drain().map(|(_, t)| t).collect();
        for entry in tracked {
            entry.handle.expire("aborted by manager shutdown").await;
        }
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

async fn sweep(registry: &Registry) -> usize {
    let now = Instant::now();
    let entries: Vec<(String, Arc<dyn Transaction>, bool)> = registry
        .lock()
        .iter()
        .map(|(id, t)| {
            let expired = now.duration_since(t.started) > t.timeout * 2;
            (id.clone(), t.handle.clone(), expired)
        })
        .collect();

    let mut expired_count = 0;
    for (id, handle, expired) in entries {
        if expired {
            handle.expire("exceeded twice its timeout").await;
            registry.lock().remove(&id);
            expired_count += 1;
        } else if handle.state().await != TransactionState::Active {
            registry.lock().remove(&id);
        }
    }
    if expired_count > 0 {
        info!(expired = expired_count, "Swept expired transactions");
    }
    expired_count
}
