//! In-memory document store.

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::store::{entry_id_of, EntryId, IndexSpec, LocalStore, ENTRY_ID};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Serializable image of one collection.
///
/// [`super::FileStore`] writes this to disk; [`MemoryStore`] keeps the live
/// equivalent in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectionImage {
    pub name: String,
    pub indexes: Vec<IndexSpec>,
    pub next_entry_id: EntryId,
    pub entries: Vec<Value>,
}

#[derive(Debug)]
struct Collection {
    indexes: Vec<IndexSpec>,
    docs: BTreeMap<EntryId, Value>,
    next_entry_id: EntryId,
}

impl Collection {
    fn new(indexes: &[IndexSpec]) -> Self {
        Self {
            indexes: indexes.to_vec(),
            docs: BTreeMap::new(),
            next_entry_id: 1,
        }
    }

    fn upsert(&mut self, name: &str, mut doc: Value) -> StoreResult<Value> {
        if !doc.is_object() {
            return Err(StoreError::invalid_document(format!(
                "expected a JSON object, got {doc}"
            )));
        }

        let entry_id = match entry_id_of(&doc)? {
            Some(id) => {
                if !self.docs.contains_key(&id) {
                    return Err(StoreError::EntryNotFound {
                        collection: name.to_string(),
                        entry_id: id,
                    });
                }
                id
            }
            None => {
                let id = self.next_entry_id;
                self.next_entry_id += 1;
                id
            }
        };

        doc[ENTRY_ID] = Value::from(entry_id);
        self.docs.insert(entry_id, doc.clone());
        Ok(doc)
    }

    fn matching<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a Value> + 'a {
        let limit = query.limit().unwrap_or(usize::MAX);
        self.docs
            .values()
            .filter(move |doc| query.matches(doc))
            .take(limit)
    }
}

/// An in-memory document store.
///
/// This store keeps every collection in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral data that does not need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads. Each call
/// takes the store lock once, so every operation is atomic on its own.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tidesync_store::{LocalStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.register_collection("contacts", &[]).unwrap();
/// let doc = store.upsert("contacts", json!({"Name": "Ada"})).unwrap();
/// let id = doc["_entry_id"].as_i64().unwrap();
/// assert!(store.retrieve("contacts", id).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a serializable image of a collection.
    pub(crate) fn image(&self, name: &str) -> StoreResult<CollectionImage> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::collection_not_found(name))?;
        Ok(CollectionImage {
            name: name.to_string(),
            indexes: collection.indexes.clone(),
            next_entry_id: collection.next_entry_id,
            entries: collection.docs.values().cloned().collect(),
        })
    }

    /// Replaces a collection with the contents of an image.
    pub(crate) fn load_image(&self, image: CollectionImage) -> StoreResult<()> {
        let mut docs = BTreeMap::new();
        let mut highest = 0;
        for doc in image.entries {
            let id = entry_id_of(&doc)?.ok_or_else(|| {
                StoreError::invalid_document(format!(
                    "stored document in {} has no entry id",
                    image.name
                ))
            })?;
            highest = highest.max(id);
            docs.insert(id, doc);
        }

        let collection = Collection {
            indexes: image.indexes,
            docs,
            next_entry_id: image.next_entry_id.max(highest + 1),
        };
        self.collections.write().insert(image.name, collection);
        Ok(())
    }

    fn with_collection<R>(
        &self,
        name: &str,
        f: impl FnOnce(&Collection) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::collection_not_found(name))?;
        f(collection)
    }

    fn with_collection_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::collection_not_found(name))?;
        f(collection)
    }
}

impl LocalStore for MemoryStore {
    fn register_collection(&self, name: &str, indexes: &[IndexSpec]) -> StoreResult<()> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(indexes));
        Ok(())
    }

    fn has_collection(&self, name: &str) -> StoreResult<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.collections.write().remove(name);
        Ok(())
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        self.with_collection(collection, |c| Ok(c.indexes.clone()))
    }

    fn upsert(&self, collection: &str, doc: Value) -> StoreResult<Value> {
        self.with_collection_mut(collection, |c| c.upsert(collection, doc))
    }

    fn upsert_by_external_id(
        &self,
        collection: &str,
        mut doc: Value,
        field: &str,
    ) -> StoreResult<Value> {
        self.with_collection_mut(collection, |c| {
            if entry_id_of(&doc)?.is_none() {
                let external = crate::query::project(&doc, field)
                    .cloned()
                    .unwrap_or(Value::Null);
                if !external.is_null() {
                    let query = Query::eq(field, external).with_limit(1);
                    let existing = c
                        .matching(&query)
                        .next()
                        .and_then(|found| found.get(ENTRY_ID))
                        .cloned();
                    if let (Some(id), Some(map)) = (existing, doc.as_object_mut()) {
                        map.insert(ENTRY_ID.to_string(), id);
                    }
                }
            }
            c.upsert(collection, doc)
        })
    }

    fn retrieve(&self, collection: &str, entry_id: EntryId) -> StoreResult<Option<Value>> {
        self.with_collection(collection, |c| Ok(c.docs.get(&entry_id).cloned()))
    }

    fn delete(&self, collection: &str, entry_id: EntryId) -> StoreResult<bool> {
        self.with_collection_mut(collection, |c| Ok(c.docs.remove(&entry_id).is_some()))
    }

    fn delete_where(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        self.with_collection_mut(collection, |c| {
            let doomed: Vec<EntryId> = c
                .docs
                .iter()
                .filter(|(_, doc)| query.matches(doc))
                .map(|(id, _)| *id)
                .take(query.limit().unwrap_or(usize::MAX))
                .collect();
            for id in &doomed {
                c.docs.remove(id);
            }
            Ok(doomed.len())
        })
    }

    fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        self.with_collection(collection, |c| Ok(c.matching(query).cloned().collect()))
    }

    fn count(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        self.with_collection(collection, |c| Ok(c.matching(query).count()))
    }
}
