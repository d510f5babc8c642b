//! JSON snapshot file backing an [`InMemoryStore`](crate::InMemoryStore).

use std::path::{Path, PathBuf};

use octofhir_core::FetchSummary;
use octofhir_storage::{ResourceRecord, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

const FORMAT_VERSION: u32 = 1;

/// On-disk layout of a snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PersistedState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub records: Vec<ResourceRecord>,
    #[serde(default)]
    pub last_summary: Option<FetchSummary>,
}

#[derive(Debug)]
pub(crate) struct SnapshotFile {
    path: PathBuf,
    /// Held across "write file, then publish" so file and memory agree.
    lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Reads the file; a missing file is an empty state.
    pub async fn load(&self) -> Result<PersistedState, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No snapshot file yet");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_slice(&bytes)?;
        if state.version > FORMAT_VERSION {
            return Err(StorageError::persistence(format!(
                "snapshot {} has unsupported format version {}",
                self.path.display(),
                state.version
            )));
        }
        Ok(state)
    }

    /// Replaces the file contents. Callers hold [`lock`](Self::lock).
    pub async fn write(
        &self,
        records: Vec<ResourceRecord>,
        last_summary: Option<FetchSummary>,
    ) -> Result<(), StorageError> {
        let state = PersistedState {
            version: FORMAT_VERSION,
            records,
            last_summary,
        };
        let bytes = serde_json::to_vec_pretty(&state)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Atomic replace.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            records = state.records.len(),
            "Snapshot file written"
        );
        Ok(())
    }
}
