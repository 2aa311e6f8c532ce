//! Error types for Contentflow operations

/// Result type for Contentflow operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error types for the workflow engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid engine or pipeline configuration (unknown workflow type,
    /// bad settings). Rejected before any workflow record is created.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The completion service call itself failed (transport or service
    /// error). Converted by the engine into a terminal `failed` record.
    #[error("Completion service error: {0}")]
    Completion(String),

    /// Workflow store failure. Infrastructure error, retryable by the
    /// caller; distinct from business-logic errors like `NotFound`.
    #[error("Store error: {0}")]
    Store(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cancellation requested for a workflow that already reached a
    /// terminal status
    #[error("Workflow {workflow_id} is not cancellable (status: {status})")]
    NotCancellable {
        workflow_id: uuid::Uuid,
        status: crate::workflow::WorkflowStatus,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Other(err.to_string())
    }
}
