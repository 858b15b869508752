//! Evaluation windows
//!
//! After a candidate change deploys, a fixed count of post-change executions
//! is observed before a promote/flag decision. At most one window is ever
//! active (`Evaluating`) per task.

use crate::domain::TaskId;
use crate::id::now_ms;
use serde::{Deserialize, Serialize};

/// Status of an evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    /// Still counting post-deploy executions
    Evaluating,
    /// Closed: the change improved the stability gap
    Promoted,
    /// Closed: the change regressed; escalated to a human
    Flagged,
    /// Open but not receiving executions (task fell out of use)
    Stalled,
    /// Cancelled externally (e.g. task deprecated); version status untouched
    Cancelled,
}

impl WindowStatus {
    /// String form used for storage columns
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Evaluating => "evaluating",
            WindowStatus::Promoted => "promoted",
            WindowStatus::Flagged => "flagged",
            WindowStatus::Stalled => "stalled",
            WindowStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the storage string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "evaluating" => Some(WindowStatus::Evaluating),
            "promoted" => Some(WindowStatus::Promoted),
            "flagged" => Some(WindowStatus::Flagged),
            "stalled" => Some(WindowStatus::Stalled),
            "cancelled" => Some(WindowStatus::Cancelled),
            _ => None,
        }
    }

    /// Returns true if the window still accepts executions.
    ///
    /// Stalled windows remain open: they resume counting if the task comes
    /// back into use.
    pub fn is_open(&self) -> bool {
        matches!(self, WindowStatus::Evaluating | WindowStatus::Stalled)
    }
}

/// Post-deploy observation window for one task version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationWindow {
    pub task_id: TaskId,

    /// The version under evaluation
    pub version_number: u32,

    /// Window open time, milliseconds since Unix epoch
    pub eval_start: i64,

    /// Distinct post-deploy executions observed so far
    pub executions_seen: usize,

    /// Memory ids already counted; backs replay-safe deduplication
    pub seen_ids: Vec<String>,

    /// Executions required before a decision
    pub target_count: usize,

    /// Last time an execution was counted, milliseconds since Unix epoch
    pub last_seen_at: i64,

    pub status: WindowStatus,
}

impl EvaluationWindow {
    /// Open a new window for a freshly deployed version
    pub fn open(task_id: TaskId, version_number: u32, target_count: usize) -> Self {
        let now = now_ms();
        Self {
            task_id,
            version_number,
            eval_start: now,
            executions_seen: 0,
            seen_ids: Vec::new(),
            target_count,
            last_seen_at: now,
            status: WindowStatus::Evaluating,
        }
    }

    /// Count one post-deploy execution, deduplicated by memory id.
    ///
    /// Returns true if the execution was newly counted. Replaying an id the
    /// window has already seen never changes `executions_seen`.
    pub fn observe(&mut self, memory_id: &str) -> bool {
        if !self.status.is_open() {
            return false;
        }
        if self.seen_ids.iter().any(|id| id == memory_id) {
            return false;
        }
        self.seen_ids.push(memory_id.to_string());
        self.executions_seen += 1;
        self.last_seen_at = now_ms();
        // A stalled window resumes evaluating once executions return
        self.status = WindowStatus::Evaluating;
        true
    }

    /// Returns true once the target count has been reached
    pub fn is_complete(&self) -> bool {
        self.executions_seen >= self.target_count
    }

    /// Milliseconds since the window last counted an execution
    pub fn idle_ms(&self, now: i64) -> i64 {
        (now - self.last_seen_at).max(0)
    }
}
