use octofhir_mcp::McpError;
use octofhir_storage::StorageError;

/// Errors produced while interpreting or routing a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Every query is patient-scoped; the caller must re-establish identity.
    #[error("No patient in context: {0}")]
    MissingContext(String),

    /// Neither the local cache nor the gateway produced data.
    #[error("Could not answer: {0}")]
    NoInterpretation(String),

    /// The plan does not fit the closed query plan shape.
    #[error("Unrecognized query plan: {0}")]
    UnrecognizedPlan(String),

    /// The interpreter could not turn the text into a plan.
    #[error("Interpretation failed: {0}")]
    Interpretation(String),

    /// Remote failure, classification preserved.
    #[error(transparent)]
    Remote(#[from] McpError),

    #[error("Local store error: {0}")]
    Storage(#[from] StorageError),
}

impl QueryError {
    pub fn missing_context(message: impl Into<String>) -> Self {
        Self::MissingContext(message.into())
    }

    pub fn no_interpretation(message: impl Into<String>) -> Self {
        Self::NoInterpretation(message.into())
    }

    pub fn unrecognized_plan(message: impl Into<String>) -> Self {
        Self::UnrecognizedPlan(message.into())
    }

    pub fn interpretation(message: impl Into<String>) -> Self {
        Self::Interpretation(message.into())
    }

    pub fn is_missing_context(&self) -> bool {
        matches!(self, Self::MissingContext(_))
    }

    pub fn is_no_interpretation(&self) -> bool {
        matches!(self, Self::NoInterpretation(_))
    }

    /// The underlying gateway error, if the remote path failed.
    pub fn as_remote(&self) -> Option<&McpError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}
