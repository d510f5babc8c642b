use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use indexmap::IndexMap;
use octofhir_core::{FetchSummary, ResourceType};
use octofhir_storage::{
    BulkInsertOutcome, LocalQuery, LocalQueryResult, LocalStore, ResourceRecord,
    ResyncTransaction, StorageError,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::persistence::SnapshotFile;

/// Records of one patient and one resource type, keyed by resource id.
pub type Partition = IndexMap<String, ResourceRecord>;

/// Immutable view of the whole cache. Replaced wholesale on commit.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    partitions: IndexMap<(String, ResourceType), Partition>,
}

impl Snapshot {
    fn from_records(records: Vec<ResourceRecord>) -> Self {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.upsert(record);
        }
        snapshot
    }

    fn upsert(&mut self, record: ResourceRecord) {
        self.partitions
            .entry((record.patient_id.clone(), record.resource_type))
            .or_default()
            .insert(record.id.clone(), record);
    }

    fn partition(&self, patient_id: &str, resource_type: ResourceType) -> Option<&Partition> {
        self.partitions
            .get(&(patient_id.to_string(), resource_type))
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> Vec<ResourceRecord> {
        self.partitions
            .values()
            .flat_map(|p| p.values().cloned())
            .collect()
    }
}

/// In-memory local store.
///
/// Readers load the current [`Snapshot`] with a single atomic pointer read and
/// never block. A resync transaction stages a private copy and swaps it in on
/// commit, so a reader sees either the old cache or the new one.
#[derive(Clone)]
pub struct InMemoryStore {
    snapshot: Arc<ArcSwap<Snapshot>>,
    /// Serialises resync transactions.
    writer: Arc<Mutex<()>>,
    summary: Arc<RwLock<Option<FetchSummary>>>,
    file: Option<Arc<SnapshotFile>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty, purely in-memory store.
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::default())),
            writer: Arc::new(Mutex::new(())),
            summary: Arc::new(RwLock::new(None)),
            file: None,
        }
    }

    /// Opens a store backed by a JSON snapshot file, loading it if present.
    ///
    /// Commits and persisted summaries rewrite the file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let file = SnapshotFile::new(path);
        let state = file.load().await?;
        tracing::info!(
            path = %file.path().display(),
            records = state.records.len(),
            has_summary = state.last_summary.is_some(),
            "Opened local snapshot"
        );
        Ok(Self {
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::from_records(
                state.records,
            ))),
            writer: Arc::new(Mutex::new(())),
            summary: Arc::new(RwLock::new(state.last_summary)),
            file: Some(Arc::new(file)),
        })
    }

    /// Current snapshot (lock-free).
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Total number of cached records.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        if self.file.is_some() {
            "memory+snapshot"
        } else {
            "memory"
        }
    }

    async fn begin_resync(&self) -> Result<Box<dyn ResyncTransaction>, StorageError> {
        let guard = self.writer.clone().lock_owned().await;
        let staged = Snapshot::clone(&self.snapshot.load());
        tracing::debug!(records = staged.len(), "Resync transaction started");
        Ok(Box::new(InMemoryResync {
            staged,
            target: self.snapshot.clone(),
            summary: self.summary.clone(),
            file: self.file.clone(),
            _writer: guard,
        }))
    }

    async fn query(
        &self,
        patient_id: &str,
        resource_type: ResourceType,
        query: &LocalQuery,
    ) -> Result<LocalQueryResult, StorageError> {
        let snapshot = self.snapshot.load();
        let candidates = snapshot
            .partition(patient_id, resource_type)
            .map(|p| p.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(query.apply(candidates))
    }

    async fn persist_summary(&self, summary: &FetchSummary) -> Result<(), StorageError> {
        match &self.file {
            Some(file) => {
                let _file_guard = file.lock().await;
                file.write(self.snapshot.load().records(), Some(summary.clone()))
                    .await?;
                *self.summary.write().await = Some(summary.clone());
            }
            None => *self.summary.write().await = Some(summary.clone()),
        }
        Ok(())
    }

    async fn load_last_summary(&self) -> Result<Option<FetchSummary>, StorageError> {
        Ok(self.summary.read().await.clone())
    }
}

/// Staged resync over an [`InMemoryStore`].
///
/// Holds the store's writer lock until committed, rolled back or dropped.
pub struct InMemoryResync {
    staged: Snapshot,
    target: Arc<ArcSwap<Snapshot>>,
    summary: Arc<RwLock<Option<FetchSummary>>>,
    file: Option<Arc<SnapshotFile>>,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl ResyncTransaction for InMemoryResync {
    async fn truncate_all(&mut self) -> Result<(), StorageError> {
        let cleared = self.staged.len();
        self.staged = Snapshot::default();
        tracing::debug!(cleared, "Staged truncate");
        Ok(())
    }

    async fn bulk_insert(
        &mut self,
        records: Vec<ResourceRecord>,
    ) -> Result<BulkInsertOutcome, StorageError> {
        let mut outcome = BulkInsertOutcome::default();
        for record in records {
            match record.validate() {
                Ok(()) => {
                    outcome.stored.push(record.key());
                    self.staged.upsert(record);
                }
                Err(e) => {
                    tracing::warn!(key = %record.key(), error = %e, "Skipping record");
                    outcome.failures.push(format!("{}: {e}", record.key()));
                }
            }
        }
        Ok(outcome)
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        let records = this.staged.len();

        if let Some(file) = &this.file {
            let _file_guard = file.lock().await;
            let summary = this.summary.read().await.clone();
            file.write(this.staged.records(), summary).await?;
            this.target.store(Arc::new(this.staged));
        } else {
            this.target.store(Arc::new(this.staged));
        }

        tracing::info!(records, "Resync committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        tracing::debug!(staged = self.staged.len(), "Resync rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_core::FetchStatus;
    use octofhir_storage::{CodeFilter, SortOrder};
    use serde_json::json;
    use std::time::Duration;

    fn observation(patient: &str, id: &str, code: &str, date: &str) -> ResourceRecord {
        ResourceRecord::new(
            patient,
            ResourceType::Observation,
            id,
            json!({
                "resourceType": "Observation",
                "id": id,
                "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
                "effectiveDateTime": date
            }),
        )
    }

    async fn seeded(records: Vec<ResourceRecord>) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin_resync().await.unwrap();
        tx.truncate_all().await.unwrap();
        let outcome = tx.bulk_insert(records).await.unwrap();
        assert!(outcome.failures.is_empty());
        tx.commit().await.unwrap();
        store
    }

    fn generation(n: usize, label: &str) -> Vec<ResourceRecord> {
        (0..n)
            .map(|i| observation("p1", &format!("{label}-{i}"), "2093-3", "2024-01-01"))
            .collect()
    }

    #[tokio::test]
    async fn test_query_is_patient_and_type_scoped() {
        let store = seeded(vec![
            observation("p1", "o1", "2093-3", "2023-01-01"),
            observation("p2", "o2", "2093-3", "2023-01-01"),
        ])
        .await;

        let result = store
            .query("p1", ResourceType::Observation, &LocalQuery::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.records[0].id, "o1");

        let none = store
            .query("p1", ResourceType::Condition, &LocalQuery::new())
            .await
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(store.count("p2", ResourceType::Observation).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refetch_overwrites_instead_of_duplicating() {
        let store = seeded(vec![observation("p1", "o1", "2093-3", "2023-01-01")]).await;

        let outcome = store
            .bulk_insert(vec![
                observation("p1", "o1", "2093-3", "2024-02-02"),
                observation("p1", "o1", "2093-3", "2024-03-03"),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.inserted(), 2);
        assert_eq!(store.len(), 1);

        let result = store
            .query("p1", ResourceType::Observation, &LocalQuery::new())
            .await
            .unwrap();
        assert_eq!(result.records[0].resource["effectiveDateTime"], "2024-03-03");
    }

    #[tokio::test]
    async fn test_invalid_records_do_not_abort_batch() {
        let store = InMemoryStore::new();
        let bad = ResourceRecord::new("p1", ResourceType::Observation, "", json!({}));
        let outcome = store
            .bulk_insert(vec![bad, observation("p1", "o1", "x", "2023-01-01")])
            .await
            .unwrap();
        assert_eq!(outcome.inserted(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_staged_changes_invisible_until_commit() {
        let store = seeded(generation(3, "old")).await;

        let mut tx = store.begin_resync().await.unwrap();
        tx.truncate_all().await.unwrap();
        assert_eq!(tx.staged_len(), 0);
        assert_eq!(store.len(), 3);

        tx.bulk_insert(generation(5, "new")).await.unwrap();
        assert_eq!(store.len(), 3);

        tx.commit().await.unwrap();
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_staged_state() {
        let store = seeded(generation(2, "old")).await;

        let mut tx = store.begin_resync().await.unwrap();
        tx.truncate_all().await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.len(), 2);

        {
            let mut tx = store.begin_resync().await.unwrap();
            tx.truncate_all().await.unwrap();
        }
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_second_resync_waits_for_first() {
        let store = InMemoryStore::new();
        let first = store.begin_resync().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin_resync()).await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(500), store.begin_resync()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_readers_never_see_truncated_state() {
        use tokio::task::JoinSet;

        let store = seeded(generation(3, "old")).await;
        let mut join_set = JoinSet::new();

        for _ in 0..8 {
            let store = store.clone();
            join_set.spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    let n = store
                        .query("p1", ResourceType::Observation, &LocalQuery::new())
                        .await
                        .unwrap()
                        .len();
                    seen.push(n);
                    tokio::task::yield_now().await;
                }
                seen
            });
        }

        let writer = store.clone();
        join_set.spawn(async move {
            let mut tx = writer.begin_resync().await.unwrap();
            tx.truncate_all().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.bulk_insert(generation(5, "new")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.commit().await.unwrap();
            Vec::new()
        });

        while let Some(result) = join_set.join_next().await {
            for n in result.unwrap() {
                assert!(n == 3 || n == 5, "reader observed {n} records");
            }
        }
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_query_applies_sort_filter_and_index() {
        let store = seeded(vec![
            observation("p1", "a", "2093-3", "2021-01-01"),
            observation("p1", "b", "2093-3", "2024-01-01"),
            observation("p1", "c", "718-7", "2025-01-01"),
        ])
        .await;

        let query = LocalQuery::new()
            .with_codes(CodeFilter::new(["2093-3"]))
            .with_sort(SortOrder::DateDescending)
            .with_record_index(0);
        let result = store
            .query("p1", ResourceType::Observation, &query)
            .await
            .unwrap();
        assert_eq!(result.matched, 2);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, "b");
    }

    #[tokio::test]
    async fn test_summary_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.load_last_summary().await.unwrap().is_none());

        let mut status = FetchStatus::pending(ResourceType::Patient);
        status.complete(1);
        let summary = FetchSummary::from_statuses("p1", [&status], false, true);
        store.persist_summary(&summary).await.unwrap();

        let loaded = store.load_last_summary().await.unwrap().unwrap();
        assert_eq!(loaded.count(ResourceType::Patient), 1);
    }

    #[tokio::test]
    async fn test_snapshot_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("snapshot.json");

        let store = InMemoryStore::open(&path).await.unwrap();
        assert_eq!(store.backend_name(), "memory+snapshot");
        assert!(store.is_empty());

        let mut tx = store.begin_resync().await.unwrap();
        tx.bulk_insert(generation(4, "gen")).await.unwrap();
        tx.commit().await.unwrap();

        let mut status = FetchStatus::pending(ResourceType::Observation);
        status.complete(4);
        store
            .persist_summary(&FetchSummary::from_statuses("p1", [&status], false, false))
            .await
            .unwrap();

        let reopened = InMemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 4);
        let summary = reopened.load_last_summary().await.unwrap().unwrap();
        assert_eq!(summary.count(ResourceType::Observation), 4);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = InMemoryStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::Persistence { .. }));
    }
}
