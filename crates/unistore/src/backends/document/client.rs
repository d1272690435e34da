//! Native document client seam.
//!
//! [`DocumentApi`] carries filters, updates and documents as JSON items in
//! the server's query syntax. [`MongoDocumentClient`] implements it over the
//! official driver when the `mongodb` feature is enabled.

use async_trait::async_trait;

use crate::error::NativeError;
use crate::types::Item;

/// Options for a multi-document read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to include or exclude.
    pub projection: Option<Item>,
    /// Sort specification, field to `1` or `-1`.
    pub sort: Option<Item>,
    /// Documents to skip before the first returned.
    pub skip: Option<u64>,
    /// Maximum documents returned.
    pub limit: Option<i64>,
    /// Index name to use.
    pub hint: Option<String>,
}

/// Native calls made by the document adapter.
#[async_trait]
pub trait DocumentApi: Send + Sync + std::fmt::Debug {
    /// Fails if the server cannot be reached.
    async fn ping(&self) -> Result<(), NativeError>;

    /// Creates a unique index on `field`; an existing one is kept.
    async fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), NativeError>;

    /// Returns the first matching document.
    async fn find_one(
        &self,
        collection: &str,
        filter: Item,
        projection: Option<Item>,
    ) -> Result<Option<Item>, NativeError>;

    /// Returns every matching document within `options`.
    async fn find(
        &self,
        collection: &str,
        filter: Item,
        options: FindOptions,
    ) -> Result<Vec<Item>, NativeError>;

    /// Returns the matched count.
    async fn replace_one(
        &self,
        collection: &str,
        filter: Item,
        replacement: Item,
        upsert: bool,
    ) -> Result<u64, NativeError>;

    /// Inserts a new document.
    async fn insert_one(&self, collection: &str, document: Item) -> Result<(), NativeError>;

    /// Returns the document after the update, or `None` if nothing matched.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Item,
        update: Item,
        upsert: bool,
    ) -> Result<Option<Item>, NativeError>;

    /// Returns the deleted count.
    async fn delete_one(&self, collection: &str, filter: Item) -> Result<u64, NativeError>;

    /// Runs a database command and returns its reply.
    async fn run_command(&self, command: Item) -> Result<Item, NativeError>;

    /// Opens a session for a multi-document transaction.
    async fn start_session(&self) -> Result<Box<dyn DocumentSession>, NativeError>;
}

/// A client session able to run a multi-document transaction.
#[async_trait]
pub trait DocumentSession: Send + Sync + std::fmt::Debug {
    /// Starts a transaction on this session.
    async fn start_transaction(&mut self) -> Result<(), NativeError>;

    /// Returns the matched count.
    async fn replace_one(
        &mut self,
        collection: &str,
        filter: Item,
        replacement: Item,
        upsert: bool,
    ) -> Result<u64, NativeError>;

    /// Returns the matched count.
    async fn update_one(
        &mut self,
        collection: &str,
        filter: Item,
        update: Item,
        upsert: bool,
    ) -> Result<u64, NativeError>;

    /// Returns the deleted count.
    async fn delete_one(&mut self, collection: &str, filter: Item) -> Result<u64, NativeError>;

    /// Returns the first matching document, read inside the transaction.
    async fn find_one(&mut self, collection: &str, filter: Item)
    -> Result<Option<Item>, NativeError>;

    /// Commits the transaction.
    async fn commit_transaction(&mut self) -> Result<(), NativeError>;

    /// Aborts the transaction.
    async fn abort_transaction(&mut self) -> Result<(), NativeError>;
}

#[cfg(feature = "mongodb")]
pub use driver::MongoDocumentClient;

#[cfg(feature = "mongodb")]
mod driver {
    use async_trait::async_trait;
    use mongodb::bson::{Bson, Document, doc};
    use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind, WriteFailure};
    use mongodb::options::{ClientOptions, Hint, IndexOptions, ReturnDocument};
    use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
    use serde_json::Value;

    use super::*;
    use crate::core::BackendKind;

    /// [`DocumentApi`] over the official driver.
    #[derive(Debug, Clone)]
    pub struct MongoDocumentClient {
        client: Client,
        database: Database,
    }

    impl MongoDocumentClient {
        /// Parses the connection string and builds a pooled client.
        pub async fn connect(
            uri: &str,
            database: &str,
            min_pool_size: u32,
            max_pool_size: u32,
        ) -> Result<Self, NativeError> {
            let mut options = ClientOptions::parse(uri).await.map_err(map_mongo_error)?;
            options.min_pool_size = Some(min_pool_size);
            options.max_pool_size = Some(max_pool_size);
            let client = Client::with_options(options).map_err(map_mongo_error)?;
            let database = client.database(database);
            Ok(Self { client, database })
        }

        /// Returns the driver client.
        pub fn client(&self) -> &Client {
            &self.client
        }

        /// Returns the configured database.
        pub fn database(&self) -> &Database {
            &self.database
        }

        fn collection(&self, name: &str) -> Collection<Document> {
            self.database.collection(name)
        }
    }

    #[async_trait]
    impl DocumentApi for MongoDocumentClient {
        async fn ping(&self) -> Result<(), NativeError> {
            self.database
                .run_command(doc! { "ping": 1 })
                .await
                .map(|_| ())
                .map_err(map_mongo_error)
        }

        async fn create_unique_index(
            &self,
            collection: &str,
            field: &str,
        ) -> Result<(), NativeError> {
            let index = IndexModel::builder()
                .keys(doc! { field: 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build();
            self.collection(collection)
                .create_index(index)
                .await
                .map(|_| ())
                .map_err(map_mongo_error)
        }

        async fn find_one(
            &self,
            collection: &str,
            filter: Item,
            projection: Option<Item>,
        ) -> Result<Option<Item>, NativeError> {
            let mut action = self.collection(collection).find_one(to_document(filter)?);
            if let Some(projection) = projection {
                action = action.projection(to_document(projection)?);
            }
            let found = action.await.map_err(map_mongo_error)?;
            Ok(found.map(to_item))
        }

        async fn find(
            &self,
            collection: &str,
            filter: Item,
            options: FindOptions,
        ) -> Result<Vec<Item>, NativeError> {
            let mut action = self.collection(collection).find(to_document(filter)?);
            if let Some(projection) = options.projection {
                action = action.projection(to_document(projection)?);
            }
            if let Some(sort) = options.sort {
                action = action.sort(to_document(sort)?);
            }
            if let Some(skip) = options.skip {
                action = action.skip(skip);
            }
            if let Some(limit) = options.limit {
                action = action.limit(limit);
            }
            if let Some(hint) = options.hint {
                action = action.hint(Hint::Name(hint));
            }
            let mut cursor = action.await.map_err(map_mongo_error)?;
            let mut items = Vec::new();
            while cursor.advance().await.map_err(map_mongo_error)? {
                let document = cursor.deserialize_current().map_err(map_mongo_error)?;
                items.push(to_item(document));
            }
            Ok(items)
        }

        async fn replace_one(
            &self,
            collection: &str,
            filter: Item,
            replacement: Item,
            upsert: bool,
        ) -> Result<u64, NativeError> {
            let result = self
                .collection(collection)
                .replace_one(to_document(filter)?, to_document(replacement)?)
                .upsert(upsert)
                .await
                .map_err(map_mongo_error)?;
            Ok(result.matched_count)
        }

        async fn insert_one(&self, collection: &str, document: Item) -> Result<(), NativeError> {
            self.collection(collection)
                .insert_one(to_document(document)?)
                .await
                .map(|_| ())
                .map_err(map_mongo_error)
        }

        async fn find_one_and_update(
            &self,
            collection: &str,
            filter: Item,
            update: Item,
            upsert: bool,
        ) -> Result<Option<Item>, NativeError> {
            let updated = self
                .collection(collection)
                .find_one_and_update(to_document(filter)?, to_document(update)?)
                .upsert(upsert)
                .return_document(ReturnDocument::After)
                .await
                .map_err(map_mongo_error)?;
            Ok(updated.map(to_item))
        }

        async fn delete_one(&self, collection: &str, filter: Item) -> Result<u64, NativeError> {
            let result = self
                .collection(collection)
                .delete_one(to_document(filter)?)
                .await
                .map_err(map_mongo_error)?;
            Ok(result.deleted_count)
        }

        async fn run_command(&self, command: Item) -> Result<Item, NativeError> {
            let reply = self
                .database
                .run_command(to_document(command)?)
                .await
                .map_err(map_mongo_error)?;
            Ok(to_item(reply))
        }

        async fn start_session(&self) -> Result<Box<dyn DocumentSession>, NativeError> {
            let session = self.client.start_session().await.map_err(map_mongo_error)?;
            Ok(Box::new(MongoSession {
                session,
                database: self.database.clone(),
            }))
        }
    }

    #[derive(Debug)]
    struct MongoSession {
        session: ClientSession,
        database: Database,
    }

    impl MongoSession {
        fn collection(&self, name: &str) -> Collection<Document> {
            self.database.collection(name)
        }
    }

    #[async_trait]
    impl DocumentSession for MongoSession {
        async fn start_transaction(&mut self) -> Result<(), NativeError> {
            self.session
                .start_transaction()
                .await
                .map_err(map_mongo_error)
        }

        async fn replace_one(
            &mut self,
            collection: &str,
            filter: Item,
            replacement: Item,
            upsert: bool,
        ) -> Result<u64, NativeError> {
            let result = self
                .collection(collection)
                .replace_one(to_document(filter)?, to_document(replacement)?)
                .upsert(upsert)
                .session(&mut self.session)
                .await
                .map_err(map_mongo_error)?;
            Ok(result.matched_count)
        }

        async fn update_one(
            &mut self,
            collection: &str,
            filter: Item,
            update: Item,
            upsert: bool,
        ) -> Result<u64, NativeError> {
            let result = self
                .collection(collection)
                .update_one(to_document(filter)?, to_document(update)?)
                .upsert(upsert)
                .session(&mut self.session)
                .await
                .map_err(map_mongo_error)?;
            Ok(result.matched_count)
        }

        async fn delete_one(&mut self, collection: &str, filter: Item) -> Result<u64, NativeError> {
            let result = self
                .collection(collection)
                .delete_one(to_document(filter)?)
                .session(&mut self.session)
                .await
                .map_err(map_mongo_error)?;
            Ok(result.deleted_count)
        }

        async fn find_one(
            &mut self,
            collection: &str,
            filter: Item,
        ) -> Result<Option<Item>, NativeError> {
            let found = self
                .collection(collection)
                .find_one(to_document(filter)?)
                .session(&mut self.session)
                .await
                .map_err(map_mongo_error)?;
            Ok(found.map(to_item))
        }

        async fn commit_transaction(&mut self) -> Result<(), NativeError> {
            self.session
                .commit_transaction()
                .await
                .map_err(map_mongo_error)
        }

        async fn abort_transaction(&mut self) -> Result<(), NativeError> {
            self.session
                .abort_transaction()
                .await
                .map_err(map_mongo_error)
        }
    }

    fn to_document(item: Item) -> Result<Document, NativeError> {
        mongodb::bson::to_document(&item).map_err(|e| {
            NativeError::new(BackendKind::Document, e.to_string()).with_code("InvalidArgument")
        })
    }

    fn to_item(document: Document) -> Item {
        match Bson::Document(document).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => Item::new(),
        }
    }

    fn map_mongo_error(err: MongoError) -> NativeError {
        let mut native = NativeError::new(BackendKind::Document, err.to_string());
        native.labels = err.labels().iter().cloned().collect();
        match err.kind.as_ref() {
            MongoErrorKind::Command(command) => {
                native.numeric_code = Some(command.code);
                native.code = Some(command.code_name.clone());
            }
            MongoErrorKind::Write(WriteFailure::WriteError(write)) => {
                native.numeric_code = Some(write.code);
                native.code = write.code_name.clone();
            }
            MongoErrorKind::Write(WriteFailure::WriteConcernError(concern)) => {
                native.numeric_code = Some(concern.code);
                native.code = Some(concern.code_name.clone());
            }
            MongoErrorKind::ServerSelection { .. } => native.code = Some("ServerSelection".into()),
            MongoErrorKind::Io(_) => native.code = Some("Io".into()),
            MongoErrorKind::ConnectionPoolCleared { .. } => {
                native.code = Some("ConnectionPoolCleared".into())
            }
            MongoErrorKind::Authentication { .. } => native.code = Some("Authentication".into()),
            MongoErrorKind::InvalidArgument { .. } => native.code = Some("InvalidArgument".into()),
            _ => {}
        }
        native
    }
}
