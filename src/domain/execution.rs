//! Execution memories
//!
//! One immutable record per completed task invocation, produced by the
//! Execution Recorder and consumed by the Metrics Aggregator, the Evaluation
//! Supervisor, and the Experience Library.

use crate::domain::TaskId;
use serde::{Deserialize, Serialize};

/// Outcome of a single task invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    /// String form used for storage columns and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Partial => "partial",
        }
    }

    /// Parse the storage string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "failure" => Some(Outcome::Failure),
            "partial" => Some(Outcome::Partial),
            _ => None,
        }
    }
}

/// Immutable record of one completed task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMemory {
    /// Unique identifier ("mem-{timestamp}-{hex}")
    pub id: String,

    /// The task this invocation belongs to
    pub task_id: TaskId,

    /// Invocation start, milliseconds since Unix epoch
    pub start_time: i64,

    /// Wall-clock duration of the invocation
    pub duration_ms: u64,

    /// How the invocation ended
    pub outcome: Outcome,

    /// Accuracy score in [0, 1]
    pub accuracy: f64,
}

impl ExecutionMemory {
    /// Returns true if the invocation succeeded
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
