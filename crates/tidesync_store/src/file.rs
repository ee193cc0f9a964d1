//! File-backed document store.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                  # Advisory lock for single-writer
//! ├─ <collection>.json     # One image per collection
//! └─ <collection>.json.tmp # Transient, used for atomic replacement
//! ```

use crate::error::{StoreError, StoreResult};
use crate::memory::{CollectionImage, MemoryStore};
use crate::query::Query;
use crate::store::{EntryId, IndexSpec, LocalStore};
use fs2::FileExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const COLLECTION_EXT: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// A document store persisted as JSON files.
///
/// All collections are loaded into memory when the store opens. Every
/// mutating call rewrites the affected collection's file before returning,
/// so data survives process restarts.
///
/// # Durability
///
/// Collection files are replaced atomically: the new image is written to a
/// temporary file, synced, and renamed over the old one.
///
/// # Thread Safety
///
/// The store holds an exclusive lock on its directory; only one `FileStore`
/// can be open per directory at a time. Within a process the store is
/// `Send + Sync`.
///
/// # Example
///
/// ```no_run
/// use serde_json::json;
/// use std::path::Path;
/// use tidesync_store::{FileStore, LocalStore};
///
/// let store = FileStore::open(Path::new("sync-data"), true).unwrap();
/// store.register_collection("accounts", &[]).unwrap();
/// store.upsert("accounts", json!({"Id": "001"})).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - A collection file cannot be read or decoded
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("store directory does not exist: {}", path.display()),
                )));
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        let inner = MemoryStore::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some(COLLECTION_EXT) {
                continue;
            }
            let data = fs::read_to_string(&file_path)?;
            let image: CollectionImage = serde_json::from_str(&data)?;
            debug!(
                collection = %image.name,
                entries = image.entries.len(),
                "loaded collection"
            );
            inner.load_image(image)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{COLLECTION_EXT}"))
    }

    /// Writes the current image of a collection to disk.
    fn persist(&self, name: &str) -> StoreResult<()> {
        let image = self.inner.image(name)?;
        let data = serde_json::to_vec_pretty(&image)?;

        let target = self.collection_path(name);
        let temp = self
            .path
            .join(format!("{name}.{COLLECTION_EXT}{TEMP_SUFFIX}"));
        {
            let mut file = File::create(&temp)?;
            std::io::Write::write_all(&mut file, &data)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        Ok(())
    }

    /// Runs a mutation and persists the collection it touched.
    fn mutate<R>(
        &self,
        name: &str,
        f: impl FnOnce(&MemoryStore) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let _guard = self.write_lock.lock();
        let result = f(&self.inner)?;
        self.persist(name)?;
        Ok(result)
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

impl LocalStore for FileStore {
    fn register_collection(&self, name: &str, indexes: &[IndexSpec]) -> StoreResult<()> {
        validate_name(name)?;
        if self.inner.has_collection(name)? {
            return Ok(());
        }
        self.mutate(name, |inner| inner.register_collection(name, indexes))
    }

    fn has_collection(&self, name: &str) -> StoreResult<bool> {
        self.inner.has_collection(name)
    }

    fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.inner.drop_collection(name)?;
        let path = self.collection_path(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        self.inner.collection_names()
    }

    fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        self.inner.indexes(collection)
    }

    fn upsert(&self, collection: &str, doc: Value) -> StoreResult<Value> {
        self.mutate(collection, |inner| inner.upsert(collection, doc))
    }

    fn upsert_by_external_id(
        &self,
        collection: &str,
        doc: Value,
        field: &str,
    ) -> StoreResult<Value> {
        self.mutate(collection, |inner| {
            inner.upsert_by_external_id(collection, doc, field)
        })
    }

    fn retrieve(&self, collection: &str, entry_id: EntryId) -> StoreResult<Option<Value>> {
        self.inner.retrieve(collection, entry_id)
    }

    fn delete(&self, collection: &str, entry_id: EntryId) -> StoreResult<bool> {
        self.mutate(collection, |inner| inner.delete(collection, entry_id))
    }

    fn delete_where(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        self.mutate(collection, |inner| inner.delete_where(collection, query))
    }

    fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        self.inner.query(collection, query)
    }

    fn count(&self, collection: &str, query: &Query) -> StoreResult<usize> {
        self.inner.count(collection, query)
    }
}
