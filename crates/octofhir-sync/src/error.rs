use octofhir_core::CoreError;
use octofhir_storage::StorageError;

/// Errors that abort a whole sync run.
///
/// Failures of a single resource type never surface here; they are recorded
/// in that type's status and in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No patient identifier was supplied.
    #[error("No patient in context: {0}")]
    MissingContext(String),

    #[error(transparent)]
    InvalidPatientId(#[from] CoreError),

    /// Another run is in progress on this orchestrator.
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Invalid sync configuration: {0}")]
    Config(String),

    /// The local store failed to reset, commit or persist the summary.
    #[error("Local store error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn is_missing_context(&self) -> bool {
        matches!(self, Self::MissingContext(_))
    }
}
