//! Local store traits.
//!
//! A [`LocalStore`] holds resources cached by the sync orchestrator and
//! answers patient-scoped queries for the query router. Writes happen only
//! through a [`ResyncTransaction`], which stages a truncate followed by bulk
//! inserts and publishes them atomically on commit.

use async_trait::async_trait;
use octofhir_core::{FetchSummary, ResourceType};

use crate::error::StorageError;
use crate::types::{BulkInsertOutcome, LocalQuery, LocalQueryResult, ResourceRecord};

/// Cache of FHIR resources keyed by (patient, resource type, resource id).
///
/// # Consistency
///
/// Readers observe either the state before a resync transaction or the state
/// after its commit, never anything staged in between.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Short name of the backend for logs and status output.
    fn backend_name(&self) -> &'static str;

    /// Opens a resync transaction.
    ///
    /// At most one transaction is open at a time; a second call waits until
    /// the first one commits or rolls back.
    async fn begin_resync(&self) -> Result<Box<dyn ResyncTransaction>, StorageError>;

    /// Queries one patient's records of one resource type.
    ///
    /// Sorting is applied before filtering, and `record_index` selects from
    /// the filtered order; an out-of-range index yields an empty result.
    async fn query(
        &self,
        patient_id: &str,
        resource_type: ResourceType,
        query: &LocalQuery,
    ) -> Result<LocalQueryResult, StorageError>;

    /// Stores the summary of the latest sync run, replacing the previous one.
    async fn persist_summary(&self, summary: &FetchSummary) -> Result<(), StorageError>;

    /// Loads the summary stored by the latest `persist_summary`.
    async fn load_last_summary(&self) -> Result<Option<FetchSummary>, StorageError>;

    /// Number of cached records for a patient and type.
    async fn count(
        &self,
        patient_id: &str,
        resource_type: ResourceType,
    ) -> Result<usize, StorageError> {
        Ok(self
            .query(patient_id, resource_type, &LocalQuery::default())
            .await?
            .matched)
    }

    /// Removes every cached record in a single committed transaction.
    async fn truncate_all(&self) -> Result<(), StorageError> {
        let mut tx = self.begin_resync().await?;
        tx.truncate_all().await?;
        tx.commit().await
    }

    /// Inserts records in a single committed transaction.
    async fn bulk_insert(
        &self,
        records: Vec<ResourceRecord>,
    ) -> Result<BulkInsertOutcome, StorageError> {
        let mut tx = self.begin_resync().await?;
        let outcome = tx.bulk_insert(records).await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

/// A staged truncate-then-repopulate sequence.
///
/// Nothing is visible to readers until [`commit`](ResyncTransaction::commit).
/// Dropping the transaction without committing discards the staged state.
#[async_trait]
pub trait ResyncTransaction: Send + Sync {
    /// Clears all staged records.
    async fn truncate_all(&mut self) -> Result<(), StorageError>;

    /// Stages records, overwriting any with the same key.
    ///
    /// Invalid records are reported in the outcome and skipped; the rest of
    /// the batch is still stored.
    async fn bulk_insert(
        &mut self,
        records: Vec<ResourceRecord>,
    ) -> Result<BulkInsertOutcome, StorageError>;

    /// Number of records currently staged.
    fn staged_len(&self) -> usize;

    /// Publishes the staged state.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Persistence` if the new state could not be
    /// written to the snapshot file.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discards the staged state.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
