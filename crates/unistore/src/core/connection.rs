//! Connection lifecycle management.
//!
//! A [`ConnectionManager`] tracks one adapter's connection state, verifies
//! liveness with a cheap native probe, and publishes [`ConnectionEvent`]s to
//! subscribers over a broadcast channel.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──probe ok──► Connected
//!                                  │
//!                                  └──probe failed──► Error
//! any state ──reconnect()──► Reconnecting ──► Connecting ...
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::backend::BackendKind;
use super::metrics::MetricsCollector;
use super::resilience::Resilience;
use crate::error::{DataError, DataResult, NativeError};
use crate::translator::TranslatorRegistry;
use crate::types::{ConnectionStatus, HealthMetrics, HealthStatus};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// A connect is in progress.
    Connecting,
    /// The last probe succeeded.
    Connected,
    /// A reconnect is in progress.
    Reconnecting,
    /// The last connect failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Connection lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect started.
    Connecting,
    /// The probe succeeded.
    Connected,
    /// The adapter disconnected.
    Disconnected,
    /// A reconnect attempt started.
    Reconnecting {
        /// One-based attempt number.
        attempt: u32,
    },
    /// A connect failed.
    Error {
        /// Translated error message.
        message: String,
    },
}

/// A cheap native no-op used to verify liveness.
#[async_trait]
pub trait ConnectionProbe: Send + Sync + fmt::Debug {
    /// Performs the probe.
    async fn probe(&self) -> Result<(), NativeError>;
}

/// Manages one adapter's connection lifecycle.
#[derive(Debug)]
pub struct ConnectionManager {
    backend: BackendKind,
    probe: Arc<dyn ConnectionProbe>,
    state: RwLock<ConnectionState>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    events: broadcast::Sender<ConnectionEvent>,
    translators: Arc<TranslatorRegistry>,
    metrics: Arc<MetricsCollector>,
    resilience: Resilience,
    max_reconnect_attempts: u32,
}

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    pub fn new(
        backend: BackendKind,
        probe: Arc<dyn ConnectionProbe>,
        translators: Arc<TranslatorRegistry>,
        metrics: Arc<MetricsCollector>,
        resilience: Resilience,
        max_reconnect_attempts: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            probe,
            state: RwLock::new(ConnectionState::Disconnected),
            last_success: RwLock::new(None),
            events,
            translators,
            metrics,
            resilience,
            max_reconnect_attempts: max_reconnect_attempts.max(1),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Returns true if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the last successful backend interaction.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    /// Records a successful backend interaction.
    pub fn mark_success(&self) {
        *self.last_success.write() = Some(Utc::now());
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Fails with [`crate::ErrorKind::Connection`] unless connected.
    pub fn ensure_connected(&self) -> DataResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DataError::connection(format!(
                "{} adapter is not connected (state: {})",
                self.backend,
                self.state()
            ))
            .with_backend(self.backend))
        }
    }

    /// Connects by running the liveness probe.
    ///
    /// Does nothing if already connected.
    pub async fn connect(&self) -> DataResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        self.emit(ConnectionEvent::Connecting);
        debug!(backend = %self.backend, "Connecting");

        match self.run_probe("connect").await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.mark_success();
                self.emit(ConnectionEvent::Connected);
                info!(backend = %self.backend, "Connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Error);
                self.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                warn!(backend = %self.backend, error = %e, "Connection failed");
                Err(DataError::connection(format!(
                    "failed to connect to {} backend: {}",
                    self.backend,
                    e.message()
                ))
                .with_backend(self.backend)
                .with_source(e))
            }
        }
    }

    /// Marks the adapter disconnected.
    pub fn disconnect(&self) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if previous != ConnectionState::Disconnected {
            self.emit(ConnectionEvent::Disconnected);
            info!(backend = %self.backend, "Disconnected");
        }
    }

    /// Disconnects and connects again, up to the configured attempt count.
    pub async fn reconnect(&self) -> DataResult<()> {
        self.disconnect();
        let mut last_error = None;
        for attempt in 1..=self.max_reconnect_attempts {
            self.set_state(ConnectionState::Reconnecting);
            self.emit(ConnectionEvent::Reconnecting { attempt });
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        backend = %self.backend,
                        attempt,
                        max_attempts = self.max_reconnect_attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < self.max_reconnect_attempts {
                        sleep(self.resilience.config().delay_for(attempt - 1)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            DataError::connection("reconnect attempts exhausted").with_backend(self.backend)
        }))
    }

    /// Runs the probe without changing state and reports health.
    ///
    /// A disconnected adapter is reported unhealthy without probing.
    pub async fn health_check(&self) -> HealthStatus {
        let (healthy, connection) = if !self.is_connected() {
            (false, ConnectionStatus::Disconnected)
        } else {
            match self.run_probe("health_check").await {
                Ok(()) => {
                    self.mark_success();
                    (true, ConnectionStatus::Connected)
                }
                Err(e) => {
                    warn!(backend = %self.backend, error = %e, "Health check failed");
                    (false, ConnectionStatus::Error)
                }
            }
        };

        HealthStatus {
            healthy,
            backend: self.backend,
            connection,
            last_success: self.last_success(),
            metrics: HealthMetrics {
                avg_response_time_ms: self.metrics.avg_response_time_ms(),
                error_rate: self.metrics.error_rate(),
                connection_count: self.metrics.connection_count(),
            },
            warnings: self
                .metrics
                .warnings()
                .iter()
                .map(ToString::to_string)
                .collect(),
            checked_at: Utc::now(),
        }
    }

    async fn run_probe(&self, operation: &str) -> DataResult<()> {
        self.resilience
            .run(operation, || async {
                self.probe
                    .probe()
                    .await
                    .map_err(|e| self.translators.translate(e))
            })
            .await
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: ConnectionEvent) {
        self.metrics.record_connection_event(&event);
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resilience::RetryConfig;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Debug, Default)]
    struct FlakyProbe {
        fail: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ConnectionProbe for FlakyProbe {
        async fn probe(&self) -> Result<(), NativeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(NativeError::new(BackendKind::Document, "connection refused")
                    .with_numeric_code(6))
            } else {
                Ok(())
            }
        }
    }

    fn manager(probe: Arc<FlakyProbe>, attempts: u32) -> ConnectionManager {
        ConnectionManager::new(
            BackendKind::Document,
            probe,
            Arc::new(TranslatorRegistry::with_defaults()),
            Arc::new(MetricsCollector::default()),
            Resilience::new(RetryConfig::none()),
            attempts,
        )
    }

    #[tokio::test]
    async fn test_connect_emits_events() {
        let probe = Arc::new(FlakyProbe::default());
        let manager = manager(probe.clone(), 5);
        let mut events = manager.subscribe();

        manager.connect().await.unwrap();

        assert!(manager.is_connected());
        assert!(manager.last_success().is_some());
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connecting);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_raises_connection_error() {
        let probe = Arc::new(FlakyProbe::default());
        probe.fail.store(true, Ordering::SeqCst);
        let manager = manager(probe, 5);

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.ensure_connected().is_err());
    }

    #[tokio::test]
    async fn test_health_check_does_not_change_state() {
        let probe = Arc::new(FlakyProbe::default());
        let manager = manager(probe.clone(), 5);
        manager.connect().await.unwrap();

        probe.fail.store(true, Ordering::SeqCst);
        let health = manager.health_check().await;
        assert!(!health.healthy);
        assert_eq!(health.connection, ConnectionStatus::Error);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_health_check_when_disconnected_skips_probe() {
        let probe = Arc::new(FlakyProbe::default());
        let manager = manager(probe.clone(), 5);
        let health = manager.health_check().await;
        assert_eq!(health.connection, ConnectionStatus::Disconnected);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_bounded_attempts() {
        let probe = Arc::new(FlakyProbe::default());
        let manager = manager(probe.clone(), 5);
        manager.connect().await.unwrap();
        probe.fail.store(true, Ordering::SeqCst);
        probe.calls.store(0, Ordering::SeqCst);

        assert!(manager.reconnect().await.is_err());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_disconnect_counts_event() {
        let metrics = Arc::new(MetricsCollector::default());
        let manager = ConnectionManager::new(
            BackendKind::KeyValue,
            Arc::new(FlakyProbe::default()),
            Arc::new(TranslatorRegistry::with_defaults()),
            metrics.clone(),
            Resilience::default(),
            1,
        );
        manager.connect().await.unwrap();
        manager.disconnect();
        manager.disconnect();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connects, 1);
        assert_eq!(snapshot.disconnects, 1);
    }
}
