//! Document backend (MongoDB-compatible).
//!
//! Keys map to collections through a prefix table and are addressed by the
//! derived `pksk` composite, which carries a unique index. Pagination is
//! offset based; multi-item commits run in a client session.

mod client;
mod config;
mod errors;
mod filter;
mod storage;
mod transaction;

#[cfg(feature = "mongodb")]
pub use client::MongoDocumentClient;
pub use client::{DocumentApi, DocumentSession, FindOptions};
pub use config::DocumentConfig;
pub use errors::DocumentErrorTranslator;
pub use filter::{COMPOSITE_ATTRIBUTE, CREATED_AT, DOCUMENT_ID, UPDATED_AT};
pub use storage::DocumentStore;
pub use transaction::DocumentTransaction;
