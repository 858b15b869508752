//! Continual-learning metrics
//!
//! The stability gap (average accuracy minus worst-case accuracy over a
//! sliding window) is the core instability signal. Metrics are always a full
//! recompute over the window, never a running or decayed estimate, so a single
//! bad outlier inside an otherwise healthy average stays visible.

use serde::{Deserialize, Serialize};

/// Sliding-window accuracy statistics for one task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinualMetrics {
    /// Mean accuracy over the window
    pub avg_accuracy: f64,

    /// Minimum accuracy over the window
    pub worst_case_accuracy: f64,

    /// avg_accuracy - worst_case_accuracy
    pub stability_gap: f64,

    /// Number of samples the window actually covered
    pub sample_count: usize,
}

impl ContinualMetrics {
    /// Metrics for a task with no recorded executions
    pub fn empty() -> Self {
        Self {
            avg_accuracy: 0.0,
            worst_case_accuracy: 0.0,
            stability_gap: 0.0,
            sample_count: 0,
        }
    }

    /// Check the internal invariants that hold for any honest recompute.
    ///
    /// Returns the first violated invariant, or None if the record is sound.
    /// A violation means the cached aggregate cannot be trusted and must be
    /// rebuilt from the execution log.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        if !(0.0..=1.0).contains(&self.avg_accuracy) {
            return Some("avg_accuracy outside [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.worst_case_accuracy) {
            return Some("worst_case_accuracy outside [0, 1]");
        }
        if self.sample_count > 0 && self.worst_case_accuracy > self.avg_accuracy + 1e-9 {
            return Some("worst_case_accuracy exceeds avg_accuracy");
        }
        if (self.stability_gap - (self.avg_accuracy - self.worst_case_accuracy)).abs() > 1e-9 {
            return Some("stability_gap is not avg - worst");
        }
        None
    }
}
