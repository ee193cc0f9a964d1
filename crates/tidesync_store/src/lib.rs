//! # tidesync Store
//!
//! Local document store interface and backends for tidesync.
//!
//! The sync engine never talks to a storage engine directly. It reads and
//! writes JSON documents through the [`LocalStore`] trait, which models a set
//! of named collections holding schemaless objects keyed by a store-assigned
//! entry id.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral data
//! - [`FileStore`] - One JSON file per collection under a locked directory
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tidesync_store::{LocalStore, MemoryStore, Query, ENTRY_ID};
//!
//! let store = MemoryStore::new();
//! store.register_collection("accounts", &[]).unwrap();
//!
//! let saved = store.upsert("accounts", json!({"Id": "001", "Name": "Acme"})).unwrap();
//! assert_eq!(saved[ENTRY_ID], json!(1));
//!
//! let found = store.query("accounts", &Query::eq("Name", json!("Acme"))).unwrap();
//! assert_eq!(found.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod query;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use query::{project, Filter, Query};
pub use store::{EntryId, IndexSpec, LocalStore, ENTRY_ID};
