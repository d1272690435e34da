//! Health reporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::BackendKind;

/// Connection status as reported by a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// The probe succeeded.
    Connected,
    /// The adapter is not connected.
    Disconnected,
    /// The probe failed.
    Error,
}

/// Aggregated metrics included in a health report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Rolling-window average response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Failed operations over total operations.
    pub error_rate: f64,
    /// Number of successful connects observed.
    pub connection_count: u64,
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// True if the backend answered the probe.
    pub healthy: bool,
    /// Backend checked.
    pub backend: BackendKind,
    /// Connection status.
    pub connection: ConnectionStatus,
    /// Last successful backend interaction.
    pub last_success: Option<DateTime<Utc>>,
    /// Aggregated metrics.
    pub metrics: HealthMetrics,
    /// Recent performance warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}
