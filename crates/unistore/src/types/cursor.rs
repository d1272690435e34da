//! Opaque pagination cursors.
//!
//! Cursors are URL-safe base64 JSON carrying a format version and a position.
//! Key-value adapters store the native continuation key; document adapters
//! store the collection being walked and a skip offset within it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use super::key::Item;
use crate::error::{DataError, DataResult};

const CURSOR_VERSION: u8 = 1;

/// Where a paginated read resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorPosition {
    /// A native continuation key.
    Key {
        /// The last evaluated key.
        key: Item,
    },
    /// A collection position and skip offset.
    Offset {
        /// Index of the collection being walked.
        collection_index: usize,
        /// Items already returned from that collection.
        skip: u64,
    },
}

/// A versioned, opaque page cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    version: u8,
    position: CursorPosition,
}

impl PageCursor {
    /// Creates a cursor resuming after a native continuation key.
    pub fn key(key: Item) -> Self {
        Self {
            version: CURSOR_VERSION,
            position: CursorPosition::Key { key },
        }
    }

    /// Creates a cursor resuming at an offset within a collection.
    pub fn offset(collection_index: usize, skip: u64) -> Self {
        Self {
            version: CURSOR_VERSION,
            position: CursorPosition::Offset {
                collection_index,
                skip,
            },
        }
    }

    /// Returns the position.
    pub fn position(&self) -> &CursorPosition {
        &self.position
    }

    /// Consumes the cursor, returning the position.
    pub fn into_position(self) -> CursorPosition {
        self.position
    }

    /// Encodes the cursor to an opaque string.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(&json)
    }

    /// Decodes a cursor from an opaque string.
    pub fn decode(s: &str) -> DataResult<Self> {
        let invalid = || DataError::validation(format!("invalid pagination cursor: {}", s));
        let bytes = URL_SAFE_NO_PAD.decode(s).map_err(|_| invalid())?;
        let cursor: PageCursor = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        if cursor.version != CURSOR_VERSION {
            return Err(DataError::validation(format!(
                "unsupported cursor version {}",
                cursor.version
            )));
        }
        Ok(cursor)
    }
}
