//! Bulk synchronisation of a patient's FHIR record into a local store.
//!
//! [`ResourceFetcher`] retrieves one resource type through the gateway's FHIR
//! request tool, following Bundle `next` links up to a page bound.
//! [`SyncOrchestrator`] truncates the store and refetches every configured
//! resource type in declared order inside one resync transaction, reporting
//! progress as [`SyncEvent`]s and finishing with a persisted
//! [`FetchSummary`](octofhir_core::FetchSummary).

pub mod config;
mod error;
pub mod fetcher;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use config::{MAX_PAGE_SIZE, SyncConfig};
pub use error::SyncError;
pub use fetcher::{FetchReport, PageProgress, ResourceFetcher, next_page_path};
pub use orchestrator::{CancelHandle, SyncEvent, SyncOrchestrator};
