//! Local store error types.

/// Errors raised by a local store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The record cannot be cached: no id, no type, or a patient mismatch.
    ///
    /// Scoped to one record; a resync skips it and keeps going.
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    /// The snapshot file could not be read, decoded or rewritten.
    #[error("Snapshot persistence failed: {message}")]
    Persistence { message: String },
}

impl StorageError {
    #[must_use]
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Returns `true` if this error concerns a single record rather than the store.
    #[must_use]
    pub fn is_invalid_record(&self) -> bool {
        matches!(self, Self::InvalidRecord { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::persistence(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::persistence(format!("snapshot is not valid JSON: {e}"))
    }
}
