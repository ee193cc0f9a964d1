//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection file could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The collection has not been registered.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// An upsert referenced an entry id that does not exist.
    #[error("entry {entry_id} not found in collection {collection}")]
    EntryNotFound {
        /// Name of the collection.
        collection: String,
        /// The missing entry id.
        entry_id: i64,
    },

    /// The document is not a JSON object or carries a malformed entry id.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The collection name cannot be used by this store.
    #[error("invalid collection name: {0}")]
    InvalidName(String),

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    Locked,
}

impl StoreError {
    /// Creates a collection-not-found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates an invalid-document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::collection_not_found("accounts");
        assert_eq!(err.to_string(), "collection not found: accounts");

        let err = StoreError::EntryNotFound {
            collection: "accounts".into(),
            entry_id: 7,
        };
        assert!(err.to_string().contains("7"));
        assert!(err.to_string().contains("accounts"));
    }
}
