//! Native key-value client seam.
//!
//! [`KeyValueApi`] is the narrow set of native calls the adapter makes, over
//! JSON items and compiled expressions. [`AwsDynamoClient`] implements it with
//! the AWS SDK when the `dynamodb` feature is enabled; tests supply an
//! in-memory implementation.

use async_trait::async_trait;
use serde_json::Value;

use super::expression::ExpressionAttributes;
use crate::error::NativeError;
use crate::types::Item;

/// Reads one item by key.
#[derive(Debug, Clone, PartialEq)]
pub struct GetItemRequest {
    /// Table name.
    pub table: String,
    /// Full primary key.
    pub key: Item,
    /// Request a strongly consistent read.
    pub consistent_read: bool,
    /// Projection expression.
    pub projection: Option<String>,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
}

/// Writes a whole item.
#[derive(Debug, Clone, PartialEq)]
pub struct PutItemRequest {
    /// Table name.
    pub table: String,
    /// Item to store, key attributes included.
    pub item: Item,
    /// Condition the stored item must satisfy.
    pub condition: Option<String>,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
}

/// Applies an update expression to one item, creating it if absent.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItemRequest {
    /// Table name.
    pub table: String,
    /// Full primary key.
    pub key: Item,
    /// `SET`/`ADD`/`REMOVE` update expression.
    pub update: String,
    /// Condition the stored item must satisfy.
    pub condition: Option<String>,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
}

/// Deletes one item by key.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteItemRequest {
    /// Table name.
    pub table: String,
    /// Full primary key.
    pub key: Item,
    /// Condition the stored item must satisfy.
    pub condition: Option<String>,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
}

/// Asserts a condition on one item inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionCheckRequest {
    /// Table name.
    pub table: String,
    /// Full primary key.
    pub key: Item,
    /// Condition the stored item must satisfy.
    pub condition: String,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
}

/// Reads one page of items sharing a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Table name.
    pub table: String,
    /// Secondary index to read instead of the table.
    pub index_name: Option<String>,
    /// Key condition expression.
    pub key_condition: String,
    /// Filter applied after the key condition.
    pub filter: Option<String>,
    /// Projection expression.
    pub projection: Option<String>,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
    /// Maximum items evaluated for this page.
    pub limit: Option<u32>,
    /// Ascending sort-key order when true.
    pub scan_forward: bool,
    /// Request a strongly consistent read.
    pub consistent_read: bool,
    /// Key to resume after, from a previous page.
    pub exclusive_start_key: Option<Item>,
}

/// Reads one page of the whole table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Table name.
    pub table: String,
    /// Secondary index to read instead of the table.
    pub index_name: Option<String>,
    /// Filter expression.
    pub filter: Option<String>,
    /// Projection expression.
    pub projection: Option<String>,
    /// Placeholder names and values used by the expressions.
    pub attributes: ExpressionAttributes,
    /// Maximum items evaluated for this page.
    pub limit: Option<u32>,
    /// Key to resume after, from a previous page.
    pub exclusive_start_key: Option<Item>,
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    /// Items in this page.
    pub items: Vec<Item>,
    /// Present when more items remain.
    pub last_evaluated_key: Option<Item>,
}

/// Reads several items by key.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetRequest {
    /// Table name.
    pub table: String,
    /// Full primary keys.
    pub keys: Vec<Item>,
    /// Request strongly consistent reads.
    pub consistent_read: bool,
    /// Projection expression.
    pub projection: Option<String>,
    /// Placeholder names used by the projection.
    pub attributes: ExpressionAttributes,
}

/// Result of one batch read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    /// Items found; missing keys are absent.
    pub items: Vec<Item>,
    /// Keys the service did not process, to be resent.
    pub unprocessed_keys: Vec<Item>,
}

/// One action of an atomic write.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWriteItem {
    /// Write a whole item.
    Put(PutItemRequest),
    /// Apply an update expression.
    Update(UpdateItemRequest),
    /// Delete an item.
    Delete(DeleteItemRequest),
    /// Assert a condition without writing.
    ConditionCheck(ConditionCheckRequest),
}

/// All-or-nothing write of several actions.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactWriteRequest {
    /// Actions applied together.
    pub items: Vec<TransactWriteItem>,
    /// Idempotency token; a repeated token is not applied twice.
    pub client_request_token: String,
}

/// A PartiQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRequest {
    /// Statement text, `?` marking each parameter.
    pub statement: String,
    /// Parameter values in order.
    pub parameters: Vec<Value>,
}

/// Native calls made by the key-value adapter.
#[async_trait]
pub trait KeyValueApi: Send + Sync + std::fmt::Debug {
    /// Fails if the table cannot be reached.
    async fn describe_table(&self, table: &str) -> Result<(), NativeError>;

    /// Returns the item, or `None` if absent.
    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>, NativeError>;

    /// Stores a whole item.
    async fn put_item(&self, request: PutItemRequest) -> Result<(), NativeError>;

    /// Returns the item after the update.
    async fn update_item(&self, request: UpdateItemRequest) -> Result<Option<Item>, NativeError>;

    /// Deletes an item; deleting an absent one succeeds.
    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), NativeError>;

    /// Reads one query page.
    async fn query(&self, request: QueryRequest) -> Result<ItemPage, NativeError>;

    /// Reads one scan page.
    async fn scan(&self, request: ScanRequest) -> Result<ItemPage, NativeError>;

    /// Reads several items in one round trip.
    async fn batch_get_item(&self, request: BatchGetRequest)
    -> Result<BatchGetOutput, NativeError>;

    /// Applies every action or none.
    async fn transact_write_items(&self, request: TransactWriteRequest)
    -> Result<(), NativeError>;

    /// Runs a statement and returns the items it produced.
    async fn execute_statement(&self, request: StatementRequest)
    -> Result<Vec<Item>, NativeError>;
}

#[cfg(feature = "dynamodb")]
pub use aws::AwsDynamoClient;

#[cfg(feature = "dynamodb")]
mod aws {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region, SdkConfig};
    use aws_sdk_dynamodb::Client;
    use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
    use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
    use aws_sdk_dynamodb::primitives::Blob;
    use aws_sdk_dynamodb::types::{
        AttributeValue, ConditionCheck, Delete, KeysAndAttributes, Put, ReturnValue,
        TransactWriteItem as AwsTransactWriteItem, Update,
    };
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde_json::{Number, Value};

    use super::*;
    use crate::core::BackendKind;

    type AttributeMap = HashMap<String, AttributeValue>;

    /// [`KeyValueApi`] over the AWS SDK.
    #[derive(Debug, Clone)]
    pub struct AwsDynamoClient {
        client: Client,
    }

    impl AwsDynamoClient {
        /// Builds a client, optionally pointed at a local endpoint.
        pub fn from_sdk_config(config: &SdkConfig, endpoint_url: Option<&str>) -> Self {
            let mut builder = aws_sdk_dynamodb::config::Builder::from(config);
            if let Some(endpoint) = endpoint_url {
                builder = builder.endpoint_url(endpoint);
            }
            Self {
                client: Client::from_conf(builder.build()),
            }
        }

        /// Loads credentials and region from the environment.
        pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region.to_string()));
            }
            loader.load().await
        }

        /// Returns the SDK client.
        pub fn client(&self) -> &Client {
            &self.client
        }
    }

    #[async_trait]
    impl KeyValueApi for AwsDynamoClient {
        async fn describe_table(&self, table: &str) -> Result<(), NativeError> {
            self.client
                .describe_table()
                .table_name(table)
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(())
        }

        async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>, NativeError> {
            let (names, _) = placeholders(&request.attributes);
            let out = self
                .client
                .get_item()
                .table_name(request.table)
                .set_key(Some(to_attribute_map(&request.key)))
                .consistent_read(request.consistent_read)
                .set_projection_expression(request.projection)
                .set_expression_attribute_names(names)
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(out.item().map(from_attribute_map))
        }

        async fn put_item(&self, request: PutItemRequest) -> Result<(), NativeError> {
            let (names, values) = placeholders(&request.attributes);
            self.client
                .put_item()
                .table_name(request.table)
                .set_item(Some(to_attribute_map(&request.item)))
                .set_condition_expression(request.condition)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(())
        }

        async fn update_item(
            &self,
            request: UpdateItemRequest,
        ) -> Result<Option<Item>, NativeError> {
            let (names, values) = placeholders(&request.attributes);
            let out = self
                .client
                .update_item()
                .table_name(request.table)
                .set_key(Some(to_attribute_map(&request.key)))
                .update_expression(request.update)
                .set_condition_expression(request.condition)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .return_values(ReturnValue::AllNew)
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(out.attributes().map(from_attribute_map))
        }

        async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), NativeError> {
            let (names, values) = placeholders(&request.attributes);
            self.client
                .delete_item()
                .table_name(request.table)
                .set_key(Some(to_attribute_map(&request.key)))
                .set_condition_expression(request.condition)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(())
        }

        async fn query(&self, request: QueryRequest) -> Result<ItemPage, NativeError> {
            let (names, values) = placeholders(&request.attributes);
            let out = self
                .client
                .query()
                .table_name(request.table)
                .set_index_name(request.index_name)
                .key_condition_expression(request.key_condition)
                .set_filter_expression(request.filter)
                .set_projection_expression(request.projection)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .set_limit(request.limit.map(|l| l.min(i32::MAX as u32) as i32))
                .scan_index_forward(request.scan_forward)
                .consistent_read(request.consistent_read)
                .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_attribute_map))
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(ItemPage {
                items: out.items().iter().map(from_attribute_map).collect(),
                last_evaluated_key: out.last_evaluated_key().map(from_attribute_map),
            })
        }

        async fn scan(&self, request: ScanRequest) -> Result<ItemPage, NativeError> {
            let (names, values) = placeholders(&request.attributes);
            let out = self
                .client
                .scan()
                .table_name(request.table)
                .set_index_name(request.index_name)
                .set_filter_expression(request.filter)
                .set_projection_expression(request.projection)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .set_limit(request.limit.map(|l| l.min(i32::MAX as u32) as i32))
                .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_attribute_map))
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(ItemPage {
                items: out.items().iter().map(from_attribute_map).collect(),
                last_evaluated_key: out.last_evaluated_key().map(from_attribute_map),
            })
        }

        async fn batch_get_item(
            &self,
            request: BatchGetRequest,
        ) -> Result<BatchGetOutput, NativeError> {
            let (names, _) = placeholders(&request.attributes);
            let keys_and_attributes = KeysAndAttributes::builder()
                .set_keys(Some(request.keys.iter().map(to_attribute_map).collect()))
                .consistent_read(request.consistent_read)
                .set_projection_expression(request.projection)
                .set_expression_attribute_names(names)
                .build()
                .map_err(build_error)?;
            let out = self
                .client
                .batch_get_item()
                .request_items(request.table.clone(), keys_and_attributes)
                .send()
                .await
                .map_err(map_sdk_error)?;

            let items = out
                .responses()
                .and_then(|responses| responses.get(&request.table))
                .map(|items| items.iter().map(from_attribute_map).collect())
                .unwrap_or_default();
            let unprocessed_keys = out
                .unprocessed_keys()
                .and_then(|unprocessed| unprocessed.get(&request.table))
                .map(|ka| ka.keys().iter().map(from_attribute_map).collect())
                .unwrap_or_default();
            Ok(BatchGetOutput {
                items,
                unprocessed_keys,
            })
        }

        async fn transact_write_items(
            &self,
            request: TransactWriteRequest,
        ) -> Result<(), NativeError> {
            let items = request
                .items
                .into_iter()
                .map(to_transact_item)
                .collect::<Result<Vec<_>, _>>()?;
            self.client
                .transact_write_items()
                .set_transact_items(Some(items))
                .client_request_token(request.client_request_token)
                .send()
                .await
                .map_err(map_transact_error)?;
            Ok(())
        }

        async fn execute_statement(
            &self,
            request: StatementRequest,
        ) -> Result<Vec<Item>, NativeError> {
            let parameters = if request.parameters.is_empty() {
                None
            } else {
                Some(request.parameters.iter().map(to_attribute_value).collect())
            };
            let out = self
                .client
                .execute_statement()
                .statement(request.statement)
                .set_parameters(parameters)
                .send()
                .await
                .map_err(map_sdk_error)?;
            Ok(out.items().iter().map(from_attribute_map).collect())
        }
    }

    fn to_transact_item(item: TransactWriteItem) -> Result<AwsTransactWriteItem, NativeError> {
        let built = match item {
            TransactWriteItem::Put(put) => {
                let (names, values) = placeholders(&put.attributes);
                AwsTransactWriteItem::builder().put(
                    Put::builder()
                        .table_name(put.table)
                        .set_item(Some(to_attribute_map(&put.item)))
                        .set_condition_expression(put.condition)
                        .set_expression_attribute_names(names)
                        .set_expression_attribute_values(values)
                        .build()
                        .map_err(build_error)?,
                )
            }
            TransactWriteItem::Update(update) => {
                let (names, values) = placeholders(&update.attributes);
                AwsTransactWriteItem::builder().update(
                    Update::builder()
                        .table_name(update.table)
                        .set_key(Some(to_attribute_map(&update.key)))
                        .update_expression(update.update)
                        .set_condition_expression(update.condition)
                        .set_expression_attribute_names(names)
                        .set_expression_attribute_values(values)
                        .build()
                        .map_err(build_error)?,
                )
            }
            TransactWriteItem::Delete(delete) => {
                let (names, values) = placeholders(&delete.attributes);
                AwsTransactWriteItem::builder().delete(
                    Delete::builder()
                        .table_name(delete.table)
                        .set_key(Some(to_attribute_map(&delete.key)))
                        .set_condition_expression(delete.condition)
                        .set_expression_attribute_names(names)
                        .set_expression_attribute_values(values)
                        .build()
                        .map_err(build_error)?,
                )
            }
            TransactWriteItem::ConditionCheck(check) => {
                let (names, values) = placeholders(&check.attributes);
                AwsTransactWriteItem::builder().condition_check(
                    ConditionCheck::builder()
                        .table_name(check.table)
                        .set_key(Some(to_attribute_map(&check.key)))
                        .condition_expression(check.condition)
                        .set_expression_attribute_names(names)
                        .set_expression_attribute_values(values)
                        .build()
                        .map_err(build_error)?,
                )
            }
        };
        Ok(built.build())
    }

    fn placeholders(
        attributes: &ExpressionAttributes,
    ) -> (Option<HashMap<String, String>>, Option<AttributeMap>) {
        let names = if attributes.names.is_empty() {
            None
        } else {
            Some(
                attributes
                    .names
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        };
        let values = if attributes.values.is_empty() {
            None
        } else {
            Some(
                attributes
                    .values
                    .iter()
                    .map(|(placeholder, value)| (placeholder.clone(), to_attribute_value(value)))
                    .collect(),
            )
        };
        (names, values)
    }

    fn to_attribute_map(item: &Item) -> AttributeMap {
        item.iter()
            .map(|(k, v)| (k.clone(), to_attribute_value(v)))
            .collect()
    }

    fn to_attribute_value(value: &Value) -> AttributeValue {
        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute_value).collect()),
            Value::Object(map) => AttributeValue::M(to_attribute_map(map)),
        }
    }

    fn from_attribute_map(map: &AttributeMap) -> Item {
        map.iter()
            .map(|(k, v)| (k.clone(), from_attribute_value(v)))
            .collect()
    }

    fn from_attribute_value(value: &AttributeValue) -> Value {
        match value {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(n) => parse_number(n),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute_value).collect()),
            AttributeValue::M(map) => Value::Object(from_attribute_map(map)),
            AttributeValue::Ss(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            AttributeValue::Ns(items) => Value::Array(items.iter().map(|n| parse_number(n)).collect()),
            AttributeValue::B(blob) => Value::String(encode_blob(blob)),
            AttributeValue::Bs(blobs) => Value::Array(
                blobs
                    .iter()
                    .map(|b| Value::String(encode_blob(b)))
                    .collect(),
            ),
            _ => Value::Null,
        }
    }

    fn encode_blob(blob: &Blob) -> String {
        STANDARD.encode(blob.as_ref())
    }

    fn parse_number(n: &str) -> Value {
        if let Ok(i) = n.parse::<i64>() {
            return Value::Number(Number::from(i));
        }
        n.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(n.to_string()))
    }

    fn build_error(err: aws_sdk_dynamodb::error::BuildError) -> NativeError {
        NativeError::new(BackendKind::KeyValue, err.to_string()).with_code("ValidationException")
    }

    fn map_sdk_error<E>(err: SdkError<E>) -> NativeError
    where
        E: ProvideErrorMetadata + std::fmt::Debug,
    {
        let fallback = format!("{err:?}");
        match err {
            SdkError::ServiceError(service_err) => {
                let code = service_err.err().code().map(str::to_string);
                let message = service_err
                    .err()
                    .message()
                    .map(str::to_string)
                    .unwrap_or(fallback);
                let mut native = NativeError::new(BackendKind::KeyValue, message);
                native.code = code;
                native
            }
            SdkError::TimeoutError(_) => {
                NativeError::new(BackendKind::KeyValue, fallback).with_code("TimeoutError")
            }
            SdkError::DispatchFailure(_) => {
                NativeError::new(BackendKind::KeyValue, fallback).with_code("DispatchFailure")
            }
            SdkError::ConstructionFailure(_) => {
                NativeError::new(BackendKind::KeyValue, fallback).with_code("ValidationException")
            }
            _ => NativeError::new(BackendKind::KeyValue, fallback),
        }
    }

    fn map_transact_error(err: SdkError<TransactWriteItemsError>) -> NativeError {
        let reasons: Vec<String> = match err.as_service_error() {
            Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) => cancelled
                .cancellation_reasons()
                .iter()
                .filter_map(|reason| reason.code().map(str::to_string))
                .filter(|code| code != "None")
                .collect(),
            _ => Vec::new(),
        };
        let mut native = map_sdk_error(err);
        native.labels.extend(reasons);
        native
    }
}
