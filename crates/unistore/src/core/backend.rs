//! Backend identification and capability discovery.

use serde::{Deserialize, Serialize};

/// Identifies the type of storage backend behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Partitioned key-value store (DynamoDB-compatible).
    KeyValue,
    /// Document store (MongoDB-compatible).
    Document,
}

impl BackendKind {
    /// Parses a provider name as used in configuration.
    ///
    /// Accepts the generic names (`keyvalue`, `document`) as well as the
    /// product names (`dynamodb`, `mongodb`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyvalue" | "key-value" | "key_value" | "dynamodb" => Some(BackendKind::KeyValue),
            "document" | "mongodb" | "mongo" => Some(BackendKind::Document),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::KeyValue => write!(f, "keyvalue"),
            BackendKind::Document => write!(f, "document"),
        }
    }
}

/// Capabilities that a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    /// Basic CRUD operations.
    Crud,
    /// Key-condition queries.
    Query,
    /// Full scans with filters.
    Scan,
    /// Multi-key reads in one round trip.
    BatchGet,
    /// Conditional writes.
    ConditionalWrites,
    /// Native multi-item atomic commit.
    NativeTransactions,
    /// Strongly consistent reads.
    ConsistentReads,
    /// Continuation-key pagination.
    CursorPagination,
    /// Skip/offset pagination.
    OffsetPagination,
    /// Secondary index selection.
    SecondaryIndexes,
    /// Raw native command execution.
    NativeCommands,
}

impl std::fmt::Display for BackendCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendCapability::Crud => "crud",
            BackendCapability::Query => "query",
            BackendCapability::Scan => "scan",
            BackendCapability::BatchGet => "batch-get",
            BackendCapability::ConditionalWrites => "conditional-writes",
            BackendCapability::NativeTransactions => "native-transactions",
            BackendCapability::ConsistentReads => "consistent-reads",
            BackendCapability::CursorPagination => "cursor-pagination",
            BackendCapability::OffsetPagination => "offset-pagination",
            BackendCapability::SecondaryIndexes => "secondary-indexes",
            BackendCapability::NativeCommands => "native-commands",
        };
        write!(f, "{}", name)
    }
}
