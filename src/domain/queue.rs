//! Improvement queue entries
//!
//! A queue entry exists only while a task sits outside the stable tier with no
//! active evaluation window. It accumulates flags across monitoring cycles
//! until the Stability Monitor emits an improvement trigger.

use crate::domain::TaskId;
use crate::id::now_ms;
use serde::{Deserialize, Serialize};

/// Pending-improvement bookkeeping for one unstable task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub task_id: TaskId,

    /// Stability gap observed at the most recent flag
    pub stability_gap: f64,

    /// Flags accumulated since the last trigger
    pub flagged_count: u32,

    /// Time of the most recent flag, milliseconds since Unix epoch
    pub last_flagged_at: i64,

    /// Monitoring cycle of the most recent flag; guards one-flag-per-cycle
    pub last_flagged_cycle: u64,

    /// Recent execution ids backing the flagged metrics
    pub execution_ids: Vec<String>,
}

impl QueueEntry {
    /// Create an entry for a task flagged for the first time
    pub fn new(task_id: TaskId, stability_gap: f64, cycle: u64, execution_ids: Vec<String>) -> Self {
        Self {
            task_id,
            stability_gap,
            flagged_count: 1,
            last_flagged_at: now_ms(),
            last_flagged_cycle: cycle,
            execution_ids,
        }
    }

    /// Record another flag.
    ///
    /// Returns true if the flag was counted; a repeated flag within the same
    /// monitoring cycle is ignored so a burst of bad executions cannot cause
    /// runaway triggering.
    pub fn flag(&mut self, stability_gap: f64, cycle: u64, execution_ids: Vec<String>) -> bool {
        if cycle == self.last_flagged_cycle {
            return false;
        }
        self.stability_gap = stability_gap;
        self.flagged_count += 1;
        self.last_flagged_at = now_ms();
        self.last_flagged_cycle = cycle;
        self.execution_ids = execution_ids;
        true
    }
}
