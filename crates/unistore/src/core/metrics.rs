//! Operation metrics and performance warnings.
//!
//! Every adapter owns one [`MetricsCollector`]. Operations record a sample
//! (name, duration, success, result count) whether they succeed or not; slow
//! operations produce a bounded list of [`PerformanceWarning`]s.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use unistore::core::{MetricsCollector, MetricsConfig};
//!
//! let metrics = MetricsCollector::new(MetricsConfig::default());
//! metrics.record("get", Duration::from_millis(12), true, 1);
//! metrics.record("get", Duration::from_millis(450), false, 0);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.total_operations, 2);
//! assert_eq!(snapshot.error_rate, 0.5);
//! assert_eq!(metrics.warnings().len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::connection::ConnectionEvent;

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Number of recent samples in the rolling average.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Maximum number of retained warnings.
    #[serde(default = "default_max_warnings")]
    pub max_warnings: usize,

    /// Per-operation slow thresholds, overriding the built-in defaults.
    #[serde(default)]
    pub thresholds_ms: HashMap<String, u64>,
}

fn default_window_size() -> usize {
    100
}

fn default_max_warnings() -> usize {
    50
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_warnings: default_max_warnings(),
            thresholds_ms: HashMap::new(),
        }
    }
}

impl MetricsConfig {
    /// Returns the slow threshold for an operation.
    pub fn threshold_for(&self, operation: &str) -> Duration {
        if let Some(ms) = self.thresholds_ms.get(operation) {
            return Duration::from_millis(*ms);
        }
        let ms = match operation {
            "get" => 100,
            "put" | "update" | "delete" => 200,
            "batch_get" | "query" => 500,
            "scan" | "transaction" => 1000,
            _ => 1000,
        };
        Duration::from_millis(ms)
    }
}

/// Aggregated statistics for one operation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    /// Number of calls.
    pub count: u64,
    /// Number of failed calls.
    pub failures: u64,
    /// Average duration in milliseconds.
    pub avg_duration_ms: f64,
    /// Average number of items returned.
    pub avg_result_count: f64,
    total_duration_ms: f64,
    total_results: u64,
}

/// A slow-operation warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWarning {
    /// Operation name.
    pub operation: String,
    /// Observed duration in milliseconds.
    pub duration_ms: u64,
    /// Threshold in milliseconds.
    pub threshold_ms: u64,
    /// When the operation finished.
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for PerformanceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} took {}ms (threshold {}ms)",
            self.operation, self.duration_ms, self.threshold_ms
        )
    }
}

/// A point-in-time copy of the collected metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// All recorded operations.
    pub total_operations: u64,
    /// Successful operations.
    pub successful_operations: u64,
    /// Failed operations.
    pub failed_operations: u64,
    /// Rolling-window average response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Failed over total; zero before any operation.
    pub error_rate: f64,
    /// Per-operation statistics.
    pub operations: HashMap<String, OperationStats>,
    /// Connect events observed.
    pub connects: u64,
    /// Disconnect events observed.
    pub disconnects: u64,
    /// Connection error events observed.
    pub connection_errors: u64,
}

/// Collects operation metrics for one adapter.
#[derive(Debug)]
pub struct MetricsCollector {
    config: MetricsConfig,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    connection_errors: AtomicU64,
    window: Mutex<VecDeque<f64>>,
    operations: Mutex<HashMap<String, OperationStats>>,
    warnings: Mutex<VecDeque<PerformanceWarning>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsCollector {
    /// Creates a collector.
    pub fn new(config: MetricsConfig) -> Self {
        let window = VecDeque::with_capacity(config.window_size);
        Self {
            config,
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            window: Mutex::new(window),
            operations: Mutex::new(HashMap::new()),
            warnings: Mutex::new(VecDeque::new()),
        }
    }

    /// Starts timing an operation.
    pub fn start(&self, operation: &'static str) -> OperationTimer<'_> {
        OperationTimer {
            collector: self,
            operation,
            started: Instant::now(),
        }
    }

    /// Records one operation sample.
    pub fn record(&self, operation: &str, duration: Duration, success: bool, result_count: usize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let ms = duration.as_secs_f64() * 1000.0;
        {
            let mut window = self.window.lock();
            window.push_back(ms);
            while window.len() > self.config.window_size.max(1) {
                window.pop_front();
            }
        }
        {
            let mut operations = self.operations.lock();
            let stats = operations.entry(operation.to_string()).or_default();
            stats.count += 1;
            if !success {
                stats.failures += 1;
            }
            stats.total_duration_ms += ms;
            stats.total_results += result_count as u64;
            stats.avg_duration_ms = stats.total_duration_ms / stats.count as f64;
            stats.avg_result_count = stats.total_results as f64 / stats.count as f64;
        }

        let threshold = self.config.threshold_for(operation);
        if duration > threshold {
            let warning = PerformanceWarning {
                operation: operation.to_string(),
                duration_ms: duration.as_millis() as u64,
                threshold_ms: threshold.as_millis() as u64,
                at: Utc::now(),
            };
            warn!(
                operation,
                elapsed_ms = warning.duration_ms,
                threshold_ms = warning.threshold_ms,
                "Slow operation"
            );
            let mut warnings = self.warnings.lock();
            warnings.push_back(warning);
            while warnings.len() > self.config.max_warnings {
                warnings.pop_front();
            }
        }
    }

    /// Counts a connection lifecycle event.
    pub fn record_connection_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                self.connects.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionEvent::Disconnected => {
                self.disconnects.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionEvent::Error { .. } => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionEvent::Connecting | ConnectionEvent::Reconnecting { .. } => {}
        }
    }

    /// Returns the rolling-window average response time in milliseconds.
    pub fn avg_response_time_ms(&self) -> f64 {
        let window = self.window.lock();
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f64>() / window.len() as f64
    }

    /// Returns failed over total operations.
    pub fn error_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failed.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Returns the number of successful connects.
    pub fn connection_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Returns a copy of the current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_operations: self.total.load(Ordering::Relaxed),
            successful_operations: self.successful.load(Ordering::Relaxed),
            failed_operations: self.failed.load(Ordering::Relaxed),
            avg_response_time_ms: self.avg_response_time_ms(),
            error_rate: self.error_rate(),
            operations: self.operations.lock().clone(),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }

    /// Returns the retained warnings, oldest first.
    pub fn warnings(&self) -> Vec<PerformanceWarning> {
        self.warnings.lock().iter().cloned().collect()
    }

    /// Clears all counters and warnings.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.connects.store(0, Ordering::Relaxed);
        self.disconnects.store(0, Ordering::Relaxed);
        self.connection_errors.store(0, Ordering::Relaxed);
        self.window.lock().clear();
        self.operations.lock().clear();
        self.warnings.lock().clear();
    }
}

/// Times one operation; finish it with [`OperationTimer::finish`].
#[derive(Debug)]
pub struct OperationTimer<'a> {
    collector: &'a MetricsCollector,
    operation: &'static str,
    started: Instant,
}

impl OperationTimer<'_> {
    /// Records the sample for a finished operation.
    pub fn finish(self, success: bool, result_count: usize) {
        self.collector
            .record(self.operation, self.started.elapsed(), success, result_count);
    }

    /// Records the sample from an operation result.
    ///
    /// `count` maps a successful value to its result count.
    pub fn observe<T, E>(self, result: &Result<T, E>, count: impl FnOnce(&T) -> usize) {
        match result {
            Ok(value) => {
                let n = count(value);
                self.finish(true, n)
            }
            Err(_) => self.finish(false, 0),
        }
    }
}
