//! The unified data model.
//!
//! Keys, conditions, queries, updates and transaction operations are expressed
//! once here and compiled into each backend's native protocol by its adapter.

mod condition;
mod cursor;
mod health;
mod key;
mod operation;
mod options;
mod query;
mod update;
pub mod value;

pub use condition::{FilterCondition, FilterOperator, KeyCondition, KeyOperator};
pub use cursor::{CursorPosition, PageCursor};
pub use health::{ConnectionStatus, HealthMetrics, HealthStatus};
pub use key::{
    DatabaseKey, Item, KeyValue, PARTITION_ATTRIBUTE, PRIMARY_ALIAS, SORT_ALIAS, SORT_ATTRIBUTE,
    normalize_item_key,
};
pub use operation::{OperationKind, TransactionOperation};
pub use options::{BatchGetOptions, DeleteOptions, GetOptions, PutOptions};
pub use query::{Page, QueryInput, ScanInput, SortOrder};
pub use update::UpdateInput;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw command passed through to the native client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativeCommand {
    /// A PartiQL statement with positional parameters (key-value backend).
    Statement {
        /// Statement text.
        statement: String,
        /// Positional parameters.
        #[serde(default)]
        parameters: Vec<Value>,
    },
    /// A database command document (document backend).
    Document(Item),
}
