//! Error types for Vigil
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Vigil
#[derive(Debug, Error)]
pub enum VigilError {
    /// Task identifier is not of the form `namespace:name`
    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    /// Record not found in storage
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Execution log write failed after retries (telemetry-only, never blocks the task)
    #[error("Telemetry write failed: {0}")]
    TelemetryWrite(String),

    /// Cached metrics failed invariant checks and must be rebuilt from the execution log
    #[error("Metrics corruption for task {task_id}: {reason}")]
    MetricsCorruption { task_id: String, reason: String },

    /// The improvement producer could not be reached; the trigger stays queued
    #[error("Improvement producer unavailable: {0}")]
    ProducerUnavailable(String),

    /// A task already has an evaluating window; the new deploy is refused
    #[error("Evaluation window already active for task: {0}")]
    DuplicateWindow(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
