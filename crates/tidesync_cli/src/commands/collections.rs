//! Collections command implementation.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tidesync_engine::record::LOCAL;
use tidesync_store::{FileStore, LocalStore, Query, StoreResult};

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of documents.
    pub documents: usize,
    /// Number of documents with unsynced local changes.
    pub dirty: usize,
    /// Indexed fields.
    pub indexes: Vec<String>,
}

/// Collects statistics for every collection of `store`.
pub fn collect(store: &dyn LocalStore) -> StoreResult<Vec<CollectionStats>> {
    store
        .collection_names()?
        .into_iter()
        .map(|name| {
            Ok(CollectionStats {
                documents: store.count(&name, &Query::all())?,
                dirty: store.count(&name, &Query::eq(LOCAL, Value::Bool(true)))?,
                indexes: store
                    .indexes(&name)?
                    .into_iter()
                    .map(|i| i.path)
                    .collect(),
                name,
            })
        })
        .collect()
}

/// Runs the collections command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(path, false)?;
    let stats = collect(&store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => {
            println!("Collections at {}", path.display());
            for col in &stats {
                println!(
                    "  {}: {} documents, {} dirty, indexes [{}]",
                    col.name,
                    col.documents,
                    col.dirty,
                    col.indexes.join(", ")
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidesync_store::{IndexSpec, MemoryStore};

    #[test]
    fn test_collect_counts_dirty_documents() {
        let store = MemoryStore::new();
        store
            .register_collection("accounts", &[IndexSpec::new("Id")])
            .unwrap();
        store.upsert("accounts", json!({"Id": "1"})).unwrap();
        let mut dirty = json!({"Id": "2"});
        dirty[LOCAL] = json!(true);
        store.upsert("accounts", dirty).unwrap();

        let stats = collect(&store).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "accounts");
        assert_eq!(stats[0].documents, 2);
        assert_eq!(stats[0].dirty, 1);
        assert_eq!(stats[0].indexes, vec!["Id"]);
    }
}
