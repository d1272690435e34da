//! Error types for the data-access layer.
//!
//! Every failure reaching a caller is a [`DataError`]: one [`ErrorKind`] with a
//! stable code and a retryable flag, the backend it came from, a timestamp, and
//! the wrapped native error when there is one. Native client failures are first
//! captured as a backend-neutral [`NativeError`] and then translated exactly once
//! (see [`crate::translator`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::BackendKind;

/// The unified error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The addressed item does not exist.
    ItemNotFound,
    /// A write or check condition evaluated to false.
    ConditionalCheckFailed,
    /// The backend could not be reached, or the adapter is not connected.
    Connection,
    /// The request was malformed and was rejected before reaching the network.
    Validation,
    /// A transaction could not be started, committed, or was no longer active.
    Transaction,
    /// The backend throttled the request.
    ThroughputExceeded,
    /// A table, collection or index does not exist.
    ResourceNotFound,
    /// Credentials were missing or insufficient.
    AccessDenied,
    /// The request or transaction timed out.
    Timeout,
    /// The backend failed in an unexpected way.
    InternalServerError,
    /// The configuration is invalid or incomplete.
    Configuration,
    /// A unique key constraint was violated.
    DuplicateKey,
}

impl ErrorKind {
    /// Returns the stable machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorKind::ConditionalCheckFailed => "CONDITIONAL_CHECK_FAILED",
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Transaction => "TRANSACTION_ERROR",
            ErrorKind::ThroughputExceeded => "THROUGHPUT_EXCEEDED",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::AccessDenied => "ACCESS_DENIED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::DuplicateKey => "DUPLICATE_KEY",
        }
    }

    /// Returns true if an operation failing with this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::ThroughputExceeded
                | ErrorKind::Timeout
                | ErrorKind::InternalServerError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ItemNotFound => "item not found",
            ErrorKind::ConditionalCheckFailed => "conditional check failed",
            ErrorKind::Connection => "connection error",
            ErrorKind::Validation => "validation error",
            ErrorKind::Transaction => "transaction error",
            ErrorKind::ThroughputExceeded => "throughput exceeded",
            ErrorKind::ResourceNotFound => "resource not found",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InternalServerError => "internal server error",
            ErrorKind::Configuration => "configuration error",
            ErrorKind::DuplicateKey => "duplicate key",
        };
        write!(f, "{}", name)
    }
}

/// The error type for all data-access operations.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DataError {
    kind: ErrorKind,
    message: String,
    backend: Option<BackendKind>,
    timestamp: DateTime<Utc>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DataError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: None,
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Creates a [`ErrorKind::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates a [`ErrorKind::Connection`] error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Creates a [`ErrorKind::Transaction`] error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    /// Creates a [`ErrorKind::Configuration`] error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Creates a [`ErrorKind::ConditionalCheckFailed`] error.
    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConditionalCheckFailed, message)
    }

    /// Creates a [`ErrorKind::ItemNotFound`] error.
    pub fn item_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ItemNotFound, message)
    }

    /// Tags the error with the backend it originated from.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the stable error code.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Returns true if the failed operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the backend the error originated from, if known.
    pub fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    /// Returns when the error was raised.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the wrapped native error, if the failure came from a backend call.
    pub fn native(&self) -> Option<&NativeError> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<NativeError>())
    }

    /// Copies kind, message, backend and timestamp without the source chain.
    ///
    /// Used where an error is both returned to the caller and recorded on a
    /// transaction context.
    pub fn detached(&self) -> DataError {
        DataError {
            kind: self.kind,
            message: self.message.clone(),
            backend: self.backend,
            timestamp: self.timestamp,
            source: None,
        }
    }
}

/// Result type alias for data-access operations.
pub type DataResult<T> = Result<T, DataError>;

/// A failure reported by a native backend client, before translation.
///
/// Clients fill in whichever identifiers their protocol provides: a symbolic
/// code (`"ConditionalCheckFailedException"`), a numeric code (`11000`), and
/// error labels.
#[derive(Error, Debug, Clone)]
#[error("{backend} client error{}: {message}", code_suffix(.code, .numeric_code))]
pub struct NativeError {
    /// Backend that produced the error.
    pub backend: BackendKind,
    /// Symbolic error code or name.
    pub code: Option<String>,
    /// Numeric error code.
    pub numeric_code: Option<i32>,
    /// Error labels attached by the server or driver.
    pub labels: Vec<String>,
    /// Error message.
    pub message: String,
}

fn code_suffix(code: &Option<String>, numeric_code: &Option<i32>) -> String {
    match (code, numeric_code) {
        (Some(code), Some(num)) => format!(" [{} {}]", code, num),
        (Some(code), None) => format!(" [{}]", code),
        (None, Some(num)) => format!(" [{}]", num),
        (None, None) => String::new(),
    }
}

impl NativeError {
    /// Creates a native error with only a message.
    pub fn new(backend: BackendKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            code: None,
            numeric_code: None,
            labels: Vec::new(),
            message: message.into(),
        }
    }

    /// Sets the symbolic code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the numeric code.
    pub fn with_numeric_code(mut self, code: i32) -> Self {
        self.numeric_code = Some(code);
        self
    }

    /// Adds an error label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Returns true if the error carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::validation(format!("invalid item data: {}", err)).with_source(err)
    }
}
