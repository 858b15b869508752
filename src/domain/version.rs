//! Task versions
//!
//! Versions form an append-only history per task. A version comes into
//! existence already deployed, and deployment requires a populated rollback
//! reference: the constructor will not produce a deployed record without one.
//! Nothing in this crate ever invokes that reference; it exists so a human
//! can.

use crate::domain::{ContinualMetrics, TaskId};
use crate::error::{Result, VigilError};
use crate::id::now_ms;
use serde::{Deserialize, Serialize};

/// Lifecycle of a deployed candidate change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Deployed and under (or awaiting) evaluation
    Deployed,
    /// Evaluation window closed with an improved stability gap
    Promoted,
    /// Evaluation window closed with a regression; escalated to a human
    PendingReview,
}

impl VersionStatus {
    /// String form used for storage columns
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Deployed => "deployed",
            VersionStatus::Promoted => "promoted",
            VersionStatus::PendingReview => "pending_review",
        }
    }

    /// Parse the storage string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deployed" => Some(VersionStatus::Deployed),
            "promoted" => Some(VersionStatus::Promoted),
            "pending_review" => Some(VersionStatus::PendingReview),
            _ => None,
        }
    }
}

/// One entry in a task's append-only version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub task_id: TaskId,

    /// Monotonic per-task version number (1-based)
    pub version_number: u32,

    /// Deployment time, milliseconds since Unix epoch
    pub timestamp: i64,

    /// Producer's summary of what changed
    pub change_summary: String,

    /// Opaque reference to the new task body
    pub new_body_reference: String,

    /// Metrics captured immediately before deployment
    pub baseline_metrics: ContinualMetrics,

    /// Ready-to-run reference for reverting this deploy. Populated before the
    /// version can exist as deployed; never invoked by this crate.
    pub rollback_reference: String,

    pub status: VersionStatus,
}

impl Version {
    /// Create a newly deployed version.
    ///
    /// Fails if `rollback_reference` is empty: a version must carry a usable
    /// rollback reference before it may be deployed.
    pub fn deploy(
        task_id: TaskId,
        version_number: u32,
        change_summary: String,
        new_body_reference: String,
        baseline_metrics: ContinualMetrics,
        rollback_reference: String,
    ) -> Result<Self> {
        if rollback_reference.trim().is_empty() {
            return Err(VigilError::InvalidState(format!(
                "version {} for {} has no rollback reference",
                version_number, task_id
            )));
        }

        Ok(Self {
            task_id,
            version_number,
            timestamp: now_ms(),
            change_summary,
            new_body_reference,
            baseline_metrics,
            rollback_reference,
            status: VersionStatus::Deployed,
        })
    }
}
