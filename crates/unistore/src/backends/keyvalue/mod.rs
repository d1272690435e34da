//! Key-value backend (DynamoDB-compatible).
//!
//! Items live in one table keyed by `pk`/`sk`. Conditions and updates compile
//! to placeholder expressions, multi-item commits are bounded to 25
//! operations, and pagination uses native continuation keys.

mod client;
mod config;
mod errors;
mod expression;
mod storage;
mod transaction;

#[cfg(feature = "dynamodb")]
pub use client::AwsDynamoClient;
pub use client::{
    BatchGetOutput, BatchGetRequest, ConditionCheckRequest, DeleteItemRequest, GetItemRequest,
    ItemPage, KeyValueApi, PutItemRequest, QueryRequest, ScanRequest, StatementRequest,
    TransactWriteItem, TransactWriteRequest, UpdateItemRequest,
};
pub use config::KeyValueConfig;
pub use errors::KeyValueErrorTranslator;
pub use expression::{CompiledUpdate, ExpressionAttributes, ExpressionBuilder};
pub use storage::{KeyValueStore, MAX_BATCH_GET_KEYS, MAX_TRANSACTION_ITEMS};
pub use transaction::KeyValueTransaction;
