//! # octofhir-storage
//!
//! Local store abstraction for FHIR resources cached from a gateway.
//!
//! This crate defines the traits and types that store backends implement.
//! Implementations live in separate crates (see `octofhir-db-memory`).
//!
//! ## Overview
//!
//! - [`LocalStore`] answers patient-scoped [`LocalQuery`] lookups and keeps
//!   the last [`FetchSummary`](octofhir_core::FetchSummary).
//! - [`ResyncTransaction`] stages a truncate followed by bulk inserts and
//!   publishes them atomically, so readers never see a half-synced cache.
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_core::ResourceType;
//! use octofhir_storage::{LocalQuery, LocalStore, ResourceRecord, SortOrder, StorageError};
//!
//! async fn latest_observation(
//!     store: &dyn LocalStore,
//!     patient_id: &str,
//! ) -> Result<Option<ResourceRecord>, StorageError> {
//!     let query = LocalQuery::new()
//!         .with_sort(SortOrder::DateDescending)
//!         .with_record_index(0);
//!     let result = store.query(patient_id, ResourceType::Observation, &query).await?;
//!     Ok(result.records.into_iter().next())
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::StorageError;
pub use traits::{LocalStore, ResyncTransaction};
pub use types::{
    BulkInsertOutcome, CodeFilter, Coding, LocalQuery, LocalQueryResult, RecordKey,
    ResourceRecord, SortOrder, resolve_path,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn LocalStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::StorageError;
    pub use crate::traits::{LocalStore, ResyncTransaction};
    pub use crate::types::{
        BulkInsertOutcome, CodeFilter, LocalQuery, LocalQueryResult, RecordKey, ResourceRecord,
        SortOrder,
    };
    pub use crate::{DynStore, StorageResult};
}
