//! Registry error types.

use serde::Serialize;

/// Errors from the backing device store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("no such record: {0}")]
    Missing(String),
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// Address block outside the configured register space.
    #[error("{0}")]
    Range(String),

    /// A unique field collides with another record.
    #[error("{0}")]
    Conflict(String),

    /// Address block intersects another device's block.
    #[error("{0}")]
    Overlap(String),

    #[error("device {0} not found")]
    NotFound(String),

    /// The update would not change anything.
    #[error("{0}")]
    NoOp(String),

    /// The record is gone but a follow-up step could not be confirmed.
    #[error("{0}")]
    PartialFailure(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// JSON rendering of a registry operation result.
///
/// Serializes as `{"success": <value>}` or `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryResponse {
    Success(serde_json::Value),
    Error(String),
}

impl RegistryResponse {
    /// Render an operation result.
    pub fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(value) => Self::Success(value),
                Err(e) => Self::Error(e.to_string()),
            },
            Err(e) => Self::Error(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
