//! Evaluation Supervisor
//!
//! Watches the post-deploy window for each deployed change and closes it with
//! one of exactly two outcomes: promote, or flag for a human. The decision
//! table is total and deterministic over the baseline and post-change
//! stability gaps. This module holds no means of reverting a deploy; the
//! rollback reference it forwards in tickets is for the human who reads them.

use crate::aggregator::MetricsAggregator;
use crate::domain::{
    ContinualMetrics, EvaluationDecision, EvaluationRecord, ExecutionMemory, TaskId, Version,
    VersionStatus, WindowStatus,
};
use crate::error::{Result, VigilError};
use crate::id::now_ms;
use crate::store::{ExecutionLog, StateStore};
use crate::ticket::{ReviewTicket, TicketSink};

/// Outcome of a closed evaluation window
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub task_id: TaskId,
    pub version_number: u32,
    pub decision: EvaluationDecision,
    pub baseline: ContinualMetrics,
    pub post: ContinualMetrics,
    /// Ticket id, present only for flagged outcomes
    pub ticket_id: Option<String>,
}

/// Drives evaluation windows to their promote-or-flag decision
pub struct EvaluationSupervisor {
    aggregator: MetricsAggregator,
}

impl EvaluationSupervisor {
    pub fn new(aggregator: MetricsAggregator) -> Self {
        Self { aggregator }
    }

    /// Feed one execution memory into the task's open window, if any.
    ///
    /// Deduplicates by memory id, so replaying a delivery never advances the
    /// count. Returns the decision when this execution completes the window.
    pub fn observe_execution(
        &self,
        memory: &ExecutionMemory,
        log: &ExecutionLog,
        store: &StateStore,
        tickets: &dyn TicketSink,
    ) -> Result<Option<EvaluationOutcome>> {
        let Some(mut window) = store.open_window(&memory.task_id)? else {
            return Ok(None);
        };

        if !window.observe(&memory.id) {
            return Ok(None);
        }
        store.put_window(&window)?;

        if !window.is_complete() {
            return Ok(None);
        }

        let version = store
            .get_version(&window.task_id, window.version_number)?
            .ok_or_else(|| {
                VigilError::NotFound(format!(
                    "version {} for {}",
                    window.version_number, window.task_id
                ))
            })?;

        let post = self
            .aggregator
            .load_verified(&window.task_id, log, store)?;
        let baseline = version.baseline_metrics;

        // Total decision table over the two gaps: strictly smaller promotes,
        // anything else flags
        let improved = post.stability_gap < baseline.stability_gap;
        let decision = if improved {
            EvaluationDecision::Promoted
        } else {
            EvaluationDecision::FlaggedForHuman
        };

        let ticket_id = if improved {
            window.status = WindowStatus::Promoted;
            store.put_window(&window)?;
            store.set_version_status(&window.task_id, window.version_number, VersionStatus::Promoted)?;
            tracing::info!(
                task_id = %window.task_id,
                version = window.version_number,
                baseline_gap = baseline.stability_gap,
                post_gap = post.stability_gap,
                "Change promoted"
            );
            None
        } else {
            window.status = WindowStatus::Flagged;
            store.put_window(&window)?;
            store.set_version_status(
                &window.task_id,
                window.version_number,
                VersionStatus::PendingReview,
            )?;
            let id = self.file_ticket(&version, baseline, post, tickets)?;
            tracing::warn!(
                task_id = %window.task_id,
                version = window.version_number,
                baseline_gap = baseline.stability_gap,
                post_gap = post.stability_gap,
                ticket_id = %id,
                "Change regressed, flagged for human review"
            );
            Some(id)
        };

        let record = EvaluationRecord {
            task_id: window.task_id.clone(),
            version_number: window.version_number,
            baseline_metrics: baseline,
            post_metrics: post,
            decision,
            recorded_at: now_ms(),
        };
        store.append_learning(&record)?;

        Ok(Some(EvaluationOutcome {
            task_id: window.task_id,
            version_number: window.version_number,
            decision,
            baseline,
            post,
            ticket_id,
        }))
    }

    /// Mark evaluating windows idle past `stall_age_ms` as stalled.
    ///
    /// Stalled windows stay open; they resume counting if executions return.
    /// Returns the tasks newly marked.
    pub fn mark_stalled(
        &self,
        store: &StateStore,
        stall_age_ms: i64,
        now: i64,
    ) -> Result<Vec<TaskId>> {
        let mut stalled = Vec::new();
        for mut window in store.list_open_windows()? {
            if window.status == WindowStatus::Evaluating && window.idle_ms(now) > stall_age_ms {
                window.status = WindowStatus::Stalled;
                store.put_window(&window)?;
                tracing::warn!(
                    task_id = %window.task_id,
                    version = window.version_number,
                    seen = window.executions_seen,
                    target = window.target_count,
                    "Evaluation window stalled, task not receiving executions"
                );
                stalled.push(window.task_id);
            }
        }
        Ok(stalled)
    }

    /// Cancel a task's open window without touching the version record.
    ///
    /// Returns false when the task has no open window.
    pub fn cancel_window(&self, task_id: &TaskId, store: &StateStore) -> Result<bool> {
        let Some(mut window) = store.open_window(task_id)? else {
            return Ok(false);
        };
        window.status = WindowStatus::Cancelled;
        store.put_window(&window)?;
        tracing::info!(task_id = %task_id, version = window.version_number, "Evaluation window cancelled");
        Ok(true)
    }

    fn file_ticket(
        &self,
        version: &Version,
        before: ContinualMetrics,
        after: ContinualMetrics,
        tickets: &dyn TicketSink,
    ) -> Result<String> {
        tickets.create_ticket(ReviewTicket {
            task_id: version.task_id.clone(),
            version_number: version.version_number,
            before,
            after,
            change_summary: version.change_summary.clone(),
            rollback_reference: version.rollback_reference.clone(),
            label: ReviewTicket::REGRESSION_LABEL.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvaluationWindow, Outcome};
    use crate::ticket::MemoryTicketSink;
    use tempfile::TempDir;

    fn task() -> TaskId {
        TaskId::parse("etl:ingest").unwrap()
    }

    fn metrics(gap: f64) -> ContinualMetrics {
        ContinualMetrics {
            avg_accuracy: 0.9,
            worst_case_accuracy: 0.9 - gap,
            stability_gap: gap,
            sample_count: 10,
        }
    }

    fn memory(i: usize, accuracy: f64) -> ExecutionMemory {
        ExecutionMemory {
            id: format!("mem-{}", i),
            task_id: task(),
            start_time: 1_738_300_800_000 + i as i64,
            duration_ms: 100,
            outcome: Outcome::Success,
            accuracy,
        }
    }

    struct Fixture {
        temp: TempDir,
        store: StateStore,
        tickets: MemoryTicketSink,
        supervisor: EvaluationSupervisor,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                store: StateStore::open_in_memory().unwrap(),
                tickets: MemoryTicketSink::new(),
                supervisor: EvaluationSupervisor::new(MetricsAggregator::new(50)),
            }
        }

        fn log(&self) -> ExecutionLog {
            ExecutionLog::new(self.temp.path()).unwrap()
        }

        /// Deploy version 1 with the given baseline gap and open a window
        fn deploy(&self, baseline_gap: f64, target: usize) {
            let version = Version::deploy(
                task(),
                1,
                "tightened retries".to_string(),
                "bodies/v1.md".to_string(),
                metrics(baseline_gap),
                "vigil rollback etl:ingest --to 0".to_string(),
            )
            .unwrap();
            self.store.append_version(&version).unwrap();
            self.store
                .put_window(&EvaluationWindow::open(task(), 1, target))
                .unwrap();
        }

        /// Log post-deploy executions with the given accuracies and feed them
        /// through the supervisor, returning the last outcome
        fn run(&self, accuracies: &[f64]) -> Option<EvaluationOutcome> {
            let log = self.log();
            let mut outcome = None;
            for (i, acc) in accuracies.iter().enumerate() {
                let m = memory(i, *acc);
                log.append(&m).unwrap();
                outcome = self
                    .supervisor
                    .observe_execution(&m, &log, &self.store, &self.tickets)
                    .unwrap();
            }
            outcome
        }
    }

    #[test]
    fn test_no_window_is_noop() {
        let f = Fixture::new();
        let log = f.log();
        let result = f
            .supervisor
            .observe_execution(&memory(0, 0.9), &log, &f.store, &f.tickets)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_window_not_complete_returns_none() {
        let f = Fixture::new();
        f.deploy(0.15, 10);
        assert!(f.run(&[0.9, 0.9, 0.9]).is_none());

        let window = f.store.open_window(&task()).unwrap().unwrap();
        assert_eq!(window.executions_seen, 3);
    }

    #[test]
    fn test_improved_gap_promotes() {
        let f = Fixture::new();
        f.deploy(0.15, 3);

        // Uniform accuracies: post gap 0.0 < baseline 0.15
        let outcome = f.run(&[0.9, 0.9, 0.9]).unwrap();
        assert_eq!(outcome.decision, EvaluationDecision::Promoted);
        assert!(outcome.ticket_id.is_none());

        let version = f.store.get_version(&task(), 1).unwrap().unwrap();
        assert_eq!(version.status, VersionStatus::Promoted);
        assert!(f.store.open_window(&task()).unwrap().is_none());
        assert!(f.tickets.tickets().is_empty());
    }

    #[test]
    fn test_regressed_gap_flags_without_reverting() {
        let f = Fixture::new();
        f.deploy(0.15, 3);

        // Spread accuracies: post gap well above baseline 0.15
        let outcome = f.run(&[0.9, 0.9, 0.3]).unwrap();
        assert_eq!(outcome.decision, EvaluationDecision::FlaggedForHuman);
        assert!(outcome.ticket_id.is_some());

        // Version stays deployed content-wise, only its status moves
        let version = f.store.get_version(&task(), 1).unwrap().unwrap();
        assert_eq!(version.status, VersionStatus::PendingReview);
        assert_eq!(version.new_body_reference, "bodies/v1.md");

        let tickets = f.tickets.tickets();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].rollback_reference, "vigil rollback etl:ingest --to 0");
        assert!((tickets[0].before.stability_gap - 0.15).abs() < 1e-12);
        assert!(tickets[0].after.stability_gap > 0.15);
        assert_eq!(tickets[0].label, ReviewTicket::REGRESSION_LABEL);
    }

    #[test]
    fn test_equal_gap_flags() {
        let f = Fixture::new();
        // Baseline gap 0.0; uniform post accuracies give gap exactly 0.0
        f.deploy(0.0, 3);

        let outcome = f.run(&[0.9, 0.9, 0.9]).unwrap();
        assert_eq!(outcome.decision, EvaluationDecision::FlaggedForHuman);
    }

    #[test]
    fn test_replayed_memory_never_double_counts() {
        let f = Fixture::new();
        f.deploy(0.15, 3);
        let log = f.log();

        let m = memory(0, 0.9);
        log.append(&m).unwrap();
        for _ in 0..5 {
            let outcome = f
                .supervisor
                .observe_execution(&m, &log, &f.store, &f.tickets)
                .unwrap();
            assert!(outcome.is_none());
        }

        let window = f.store.open_window(&task()).unwrap().unwrap();
        assert_eq!(window.executions_seen, 1);
    }

    #[test]
    fn test_every_outcome_reaches_learning_log() {
        let f = Fixture::new();
        f.deploy(0.15, 3);
        f.run(&[0.9, 0.9, 0.9]).unwrap();

        let history = f.store.list_learning(&task()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version_number, 1);
        assert_eq!(history[0].decision, EvaluationDecision::Promoted);
        assert!((history[0].baseline_metrics.stability_gap - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_mark_stalled_by_idle_age() {
        let f = Fixture::new();
        f.deploy(0.15, 10);

        let now = now_ms() + 25 * 60 * 60 * 1000;
        let stalled = f
            .supervisor
            .mark_stalled(&f.store, 24 * 60 * 60 * 1000, now)
            .unwrap();
        assert_eq!(stalled, vec![task()]);

        // Stalled windows are still open and resume on the next execution
        let window = f.store.open_window(&task()).unwrap().unwrap();
        assert_eq!(window.status, WindowStatus::Stalled);
        assert!(f.run(&[0.9]).is_none());
        let window = f.store.open_window(&task()).unwrap().unwrap();
        assert_eq!(window.status, WindowStatus::Evaluating);
    }

    #[test]
    fn test_mark_stalled_skips_fresh_windows() {
        let f = Fixture::new();
        f.deploy(0.15, 10);

        let stalled = f
            .supervisor
            .mark_stalled(&f.store, 24 * 60 * 60 * 1000, now_ms())
            .unwrap();
        assert!(stalled.is_empty());
    }

    #[test]
    fn test_cancel_window_leaves_version_alone() {
        let f = Fixture::new();
        f.deploy(0.15, 10);

        assert!(f.supervisor.cancel_window(&task(), &f.store).unwrap());
        assert!(f.store.open_window(&task()).unwrap().is_none());

        let version = f.store.get_version(&task(), 1).unwrap().unwrap();
        assert_eq!(version.status, VersionStatus::Deployed);

        // No window left to cancel
        assert!(!f.supervisor.cancel_window(&task(), &f.store).unwrap());
    }
}
