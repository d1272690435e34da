//! Operations grouped into a transaction.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::condition::FilterCondition;
use super::key::{DatabaseKey, Item};
use super::update::UpdateInput;
use crate::error::DataResult;

/// One operation in a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransactionOperation {
    /// Writes a whole item.
    Put {
        /// The item, including its key attributes.
        item: Item,
    },
    /// Applies a partial update.
    Update(UpdateInput),
    /// Deletes an item.
    Delete {
        /// The item to delete.
        key: DatabaseKey,
    },
    /// Requires an item to satisfy a predicate without modifying it.
    ConditionCheck {
        /// The item to check.
        key: DatabaseKey,
        /// The predicate.
        condition: FilterCondition,
    },
}

/// The kind of a [`TransactionOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Put.
    Put,
    /// Update.
    Update,
    /// Delete.
    Delete,
    /// Condition check.
    ConditionCheck,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Put => write!(f, "put"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::ConditionCheck => write!(f, "conditionCheck"),
        }
    }
}

impl TransactionOperation {
    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            TransactionOperation::Put { .. } => OperationKind::Put,
            TransactionOperation::Update(_) => OperationKind::Update,
            TransactionOperation::Delete { .. } => OperationKind::Delete,
            TransactionOperation::ConditionCheck { .. } => OperationKind::ConditionCheck,
        }
    }

    /// Returns the key the operation targets.
    pub fn key(&self) -> DataResult<DatabaseKey> {
        match self {
            TransactionOperation::Put { item } => DatabaseKey::from_item(item),
            TransactionOperation::Update(update) => Ok(update.key.clone()),
            TransactionOperation::Delete { key } => Ok(key.clone()),
            TransactionOperation::ConditionCheck { key, .. } => Ok(key.clone()),
        }
    }

    /// Returns true if the operation changes stored data.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, TransactionOperation::ConditionCheck { .. })
    }

    /// Validates the operation's key and operands.
    pub fn validate(&self) -> DataResult<()> {
        match self {
            TransactionOperation::Put { item } => DatabaseKey::from_item(item).map(|_| ()),
            TransactionOperation::Update(update) => update.validate(),
            TransactionOperation::Delete { key } => key.validate(),
            TransactionOperation::ConditionCheck { key, condition } => {
                key.validate()?;
                condition.validate()
            }
        }
    }
}
