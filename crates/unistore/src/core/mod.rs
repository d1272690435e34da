//! Core traits and shared machinery.
//!
//! - [`DataProvider`] - the provider contract implemented by each adapter
//! - [`ConnectionManager`] - connection lifecycle and health probing
//! - [`Resilience`] - retry with exponential backoff
//! - [`MetricsCollector`] - operation metrics and performance warnings
//! - [`NativeTransaction`] - backend-native multi-item transactions

mod backend;
mod connection;
mod metrics;
mod resilience;
mod storage;
mod transaction;

pub use backend::{BackendCapability, BackendKind};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionProbe, ConnectionState};
pub use metrics::{
    MetricsCollector, MetricsConfig, MetricsSnapshot, OperationStats, OperationTimer,
    PerformanceWarning,
};
pub use resilience::{Resilience, RetryConfig};
pub use storage::DataProvider;
pub use transaction::{
    NativeTransaction, RetryCallback, RollbackCallback, TransactionContext, TransactionOptions,
    TransactionState, TransactionSummary,
};
