//! Stability Monitor
//!
//! Classifies each task's stability gap into severity tiers and walks the
//! per-task improvement state machine: `idle -> queued -> evaluating -> idle`.
//! The state is an explicit tagged variant rather than something inferred
//! from queue presence, so the machine stays inspectable and testable.

use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;
use crate::domain::{ContinualMetrics, QueueEntry, TaskId};
use crate::id::{generate_trigger_id, now_ms};

/// Severity tier for a task's stability gap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityTier {
    Stable,
    Degrading,
    Critical,
}

/// Per-task position in the improvement state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskHealth {
    /// Stable, nothing pending
    Idle,
    /// Flagged at least once; may hold a queue entry
    Queued,
    /// A deployed change is under evaluation; all triggering suppressed
    Evaluating,
}

/// Request for an improvement attempt, emitted by the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementTrigger {
    pub id: String,
    pub task_id: TaskId,
    pub tier: StabilityTier,
    pub metrics: ContinualMetrics,
    /// Monitoring cycle that emitted the trigger
    pub cycle: u64,
    pub created_at: i64,
}

/// Classifies metrics and manages the per-task queue and state machine
pub struct StabilityMonitor {
    thresholds: ThresholdConfig,
}

impl StabilityMonitor {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    /// Classify a stability gap into its severity tier
    pub fn classify(&self, gap: f64) -> StabilityTier {
        if gap > self.thresholds.critical_gap {
            StabilityTier::Critical
        } else if gap > self.thresholds.degrading_gap {
            StabilityTier::Degrading
        } else {
            StabilityTier::Stable
        }
    }

    /// Observe one monitoring cycle for a task.
    ///
    /// Mutates the task's health state and queue entry in place and returns a
    /// trigger when one fires. Repeat observations within one cycle flag at
    /// most once; everything is suppressed while a window is evaluating or
    /// before the cold-start sample minimum is met.
    pub fn observe(
        &self,
        cycle: u64,
        task_id: &TaskId,
        metrics: &ContinualMetrics,
        state: &mut TaskHealth,
        queue: &mut Option<QueueEntry>,
        execution_ids: Vec<String>,
    ) -> Option<ImprovementTrigger> {
        // Invariant: flagged_count never advances while a window is active
        if *state == TaskHealth::Evaluating {
            return None;
        }

        if metrics.sample_count < self.thresholds.min_samples {
            return None;
        }

        let tier = self.classify(metrics.stability_gap);

        match tier {
            StabilityTier::Stable => {
                if queue.is_some() || *state == TaskHealth::Queued {
                    tracing::debug!(task_id = %task_id, "Task back in stable tier, clearing queue entry");
                }
                *queue = None;
                *state = TaskHealth::Idle;
                None
            }
            StabilityTier::Degrading | StabilityTier::Critical => {
                let flagged = match queue {
                    Some(entry) => entry.flag(metrics.stability_gap, cycle, execution_ids),
                    None => {
                        *queue = Some(QueueEntry::new(
                            task_id.clone(),
                            metrics.stability_gap,
                            cycle,
                            execution_ids,
                        ));
                        true
                    }
                };
                *state = TaskHealth::Queued;

                // Repeat observations within one cycle never re-fire; the
                // first critical observation of a cycle always counts as
                // flagged, so it still triggers immediately.
                if !flagged {
                    return None;
                }

                let entry = queue.as_mut().expect("queue entry exists after flagging");
                let should_trigger =
                    tier == StabilityTier::Critical || entry.flagged_count >= self.thresholds.trigger_count;

                if should_trigger {
                    entry.flagged_count = 0;
                    tracing::info!(
                        task_id = %task_id,
                        gap = metrics.stability_gap,
                        tier = ?tier,
                        cycle,
                        "Emitting improvement trigger"
                    );
                    Some(ImprovementTrigger {
                        id: generate_trigger_id(),
                        task_id: task_id.clone(),
                        tier,
                        metrics: *metrics,
                        cycle,
                        created_at: now_ms(),
                    })
                } else {
                    None
                }
            }
        }
    }
}
