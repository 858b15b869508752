//! Evaluation outcomes and the per-task learning log
//!
//! Every closed evaluation window appends one record here, regardless of the
//! decision. The Improvement Dispatcher feeds this history back to the
//! producer on later attempts.

use crate::domain::{ContinualMetrics, TaskId};
use serde::{Deserialize, Serialize};

/// Outcome of a completed evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationDecision {
    /// The change narrowed the stability gap
    Promoted,
    /// The change held or widened the gap; a human decides what happens next
    FlaggedForHuman,
}

impl EvaluationDecision {
    /// String form used for storage columns and tickets
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationDecision::Promoted => "promoted",
            EvaluationDecision::FlaggedForHuman => "flagged_for_human",
        }
    }
}

/// One permanent learning-log entry for a closed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub task_id: TaskId,
    pub version_number: u32,
    pub baseline_metrics: ContinualMetrics,
    pub post_metrics: ContinualMetrics,
    pub decision: EvaluationDecision,
    /// Decision time, milliseconds since Unix epoch
    pub recorded_at: i64,
}
