//! In-memory local store backend for the OctoFHIR gateway client.
//!
//! This crate provides an implementation of the `LocalStore` trait from
//! `octofhir-storage`, publishing each resync as an atomically swapped
//! snapshot so readers never block and never observe a half-synced cache.
//! A store can optionally be backed by a JSON snapshot file.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_db_memory::InMemoryStore;
//! use octofhir_storage::LocalStore;
//!
//! let store = InMemoryStore::open("~/.octofhir-gw/cache.json").await?;
//! let mut tx = store.begin_resync().await?;
//! tx.truncate_all().await?;
//! tx.bulk_insert(records).await?;
//! tx.commit().await?;
//! ```

mod persistence;
pub mod storage;

pub use octofhir_storage::{LocalStore, ResyncTransaction, StorageError};
pub use storage::{InMemoryResync, InMemoryStore, Partition, Snapshot};

/// Type alias for a shareable store instance.
pub type DynLocalStore = std::sync::Arc<dyn LocalStore>;

/// Creates a store, file-backed when `path` is given.
pub async fn create_local_store(
    path: Option<std::path::PathBuf>,
) -> Result<DynLocalStore, StorageError> {
    Ok(match path {
        Some(path) => std::sync::Arc::new(InMemoryStore::open(path).await?),
        None => std::sync::Arc::new(InMemoryStore::new()),
    })
}
