//! Metrics Aggregator
//!
//! Recomputes each task's continual-learning statistics from scratch on every
//! new execution memory. The window is a true sliding window over the last
//! `min(W, count)` records: an exponentially decayed estimate would let a
//! single bad outlier hide inside a healthy average, which is exactly the
//! signal the stability gap exists to expose.

use crate::domain::{ContinualMetrics, ExecutionMemory, TaskId};
use crate::error::{Result, VigilError};
use crate::store::{ExecutionLog, StateStore};

/// Full-recompute sliding-window aggregator
pub struct MetricsAggregator {
    window_size: usize,
}

impl MetricsAggregator {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Recompute metrics over the last `min(W, len)` samples.
    ///
    /// `samples` must be ordered oldest first; only the tail inside the
    /// window contributes.
    pub fn recompute(&self, samples: &[ExecutionMemory]) -> ContinualMetrics {
        let window = if samples.len() > self.window_size {
            &samples[samples.len() - self.window_size..]
        } else {
            samples
        };

        if window.is_empty() {
            return ContinualMetrics::empty();
        }

        let sum: f64 = window.iter().map(|m| m.accuracy).sum();
        let avg = sum / window.len() as f64;
        let worst = window
            .iter()
            .map(|m| m.accuracy)
            .fold(f64::INFINITY, f64::min);

        ContinualMetrics {
            avg_accuracy: avg,
            worst_case_accuracy: worst,
            stability_gap: avg - worst,
            sample_count: window.len(),
        }
    }

    /// Recompute from the execution log after a new memory and cache the result
    pub fn on_execution(
        &self,
        task_id: &TaskId,
        log: &ExecutionLog,
        store: &StateStore,
    ) -> Result<ContinualMetrics> {
        let recent = log.read_recent(task_id, self.window_size)?;
        let metrics = self.recompute(&recent);
        store.put_metrics(task_id, &metrics)?;
        Ok(metrics)
    }

    /// Load a task's metrics, trusting the cache only if it passes invariant
    /// checks. A violation means the cached aggregate is corrupt; it is
    /// rebuilt from the execution log rather than propagated.
    pub fn load_verified(
        &self,
        task_id: &TaskId,
        log: &ExecutionLog,
        store: &StateStore,
    ) -> Result<ContinualMetrics> {
        if let Some(cached) = store.get_metrics(task_id)? {
            match cached.invariant_violation() {
                None => return Ok(cached),
                Some(reason) => {
                    let err = VigilError::MetricsCorruption {
                        task_id: task_id.to_string(),
                        reason: reason.to_string(),
                    };
                    tracing::warn!(
                        error = %err,
                        "Cached metrics rejected, rebuilding from execution log"
                    );
                }
            }
        }
        self.on_execution(task_id, log, store)
    }
}
