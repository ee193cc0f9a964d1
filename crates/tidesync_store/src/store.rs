//! Local store trait definition.

use crate::error::StoreResult;
use crate::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned identifier of a document within its collection.
pub type EntryId = i64;

/// Key under which the store records a document's entry id.
pub const ENTRY_ID: &str = "_entry_id";

/// A declared index on a document field path.
///
/// Indexes are advisory: stores may use them to speed up lookups, but every
/// field can be queried whether or not it is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Dotted path of the indexed field.
    pub path: String,
}

impl IndexSpec {
    /// Creates an index spec for the given field path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A local, queryable document store made of named collections.
///
/// Documents are JSON objects. Every stored document carries its entry id
/// under [`ENTRY_ID`]; the store assigns it on first insert and uses it to
/// recognise updates.
///
/// # Invariants
///
/// - Entry ids are unique within a collection and never reused
/// - `query` returns documents in ascending entry id order
/// - Operations on an unregistered collection fail with `CollectionNotFound`
/// - Implementations must be `Send + Sync`; each call is atomic on its own
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Creates the collection if it does not exist yet.
    ///
    /// Registering an existing collection is a no-op.
    fn register_collection(&self, name: &str, indexes: &[IndexSpec]) -> StoreResult<()>;

    /// Returns true if the collection exists.
    fn has_collection(&self, name: &str) -> StoreResult<bool>;

    /// Removes a collection and all of its documents.
    fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Returns the names of all collections, sorted.
    fn collection_names(&self) -> StoreResult<Vec<String>>;

    /// Returns the indexes declared for a collection.
    fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>>;

    /// Inserts or replaces a document.
    ///
    /// A document without an entry id is inserted under a fresh one; a
    /// document with an entry id replaces the stored document.
    ///
    /// Returns the stored document, entry id included.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The collection is not registered
    /// - The document is not an object
    /// - The entry id does not exist in the collection
    fn upsert(&self, collection: &str, doc: Value) -> StoreResult<Value>;

    /// Inserts or replaces a document, matching existing documents on `field`.
    ///
    /// If the document has no entry id but another document has the same
    /// value at `field`, that document is replaced.
    fn upsert_by_external_id(&self, collection: &str, doc: Value, field: &str)
        -> StoreResult<Value>;

    /// Retrieves a document by entry id.
    fn retrieve(&self, collection: &str, entry_id: EntryId) -> StoreResult<Option<Value>>;

    /// Deletes a document by entry id. Returns true if it existed.
    fn delete(&self, collection: &str, entry_id: EntryId) -> StoreResult<bool>;

    /// Deletes every document matching the query. Returns how many were removed.
    fn delete_where(&self, collection: &str, query: &Query) -> StoreResult<usize>;

    /// Returns the documents matching the query.
    fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>>;

    /// Counts the documents matching the query.
    fn count(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        Ok(self.query(collection, query)?.len())
    }

    /// Finds the entry id of the first document whose `field` equals `value`.
    fn lookup_entry_id(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<EntryId>> {
        let found = self.query(
            collection,
            &Query::eq(field, value.clone()).with_limit(1),
        )?;
        Ok(found
            .first()
            .and_then(|doc| doc.get(ENTRY_ID))
            .and_then(Value::as_i64))
    }
}

/// Reads the entry id carried by a document, if any.
pub(crate) fn entry_id_of(doc: &Value) -> StoreResult<Option<EntryId>> {
    match doc.get(ENTRY_ID) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            crate::error::StoreError::invalid_document(format!(
                "{ENTRY_ID} must be an integer, got {value}"
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_id_of_reads_integer() {
        assert_eq!(entry_id_of(&json!({"_entry_id": 4})).unwrap(), Some(4));
        assert_eq!(entry_id_of(&json!({"a": 1})).unwrap(), None);
        assert_eq!(entry_id_of(&json!({"_entry_id": null})).unwrap(), None);
    }

    #[test]
    fn entry_id_of_rejects_strings() {
        assert!(entry_id_of(&json!({"_entry_id": "4"})).is_err());
    }
}
