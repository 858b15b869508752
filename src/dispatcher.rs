//! Improvement Dispatcher
//!
//! Turns an emitted trigger into a deployed candidate change: assembles the
//! producer request from the task's learning history and prior attempts,
//! calls the producer, records the new version with its baseline metrics and
//! rollback reference, and opens the post-deploy evaluation window. A task
//! with an open window refuses further deploys until the window closes.

use std::time::Duration;

use crate::domain::{EvaluationWindow, TaskId, Version};
use crate::error::{Result, VigilError};
use crate::id::now_ms;
use crate::monitor::ImprovementTrigger;
use crate::producer::{ImprovementProducer, ImprovementRequest, ProposedChange};
use crate::store::StateStore;

/// Exponential backoff state for an unreachable producer.
///
/// The trigger that hit the failure stays queued; the backoff only gates
/// when the next attempt may go out.
#[derive(Debug, Clone)]
pub struct ProducerBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
    ready_at: i64,
}

impl ProducerBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
            current: Duration::from_millis(base_ms),
            ready_at: 0,
        }
    }

    /// Whether an attempt may be made at `now`
    pub fn ready(&self, now: i64) -> bool {
        now >= self.ready_at
    }

    /// Record a failed attempt at `now`; doubles the delay up to the cap
    pub fn record_failure(&mut self, now: i64) {
        self.ready_at = now + self.current.as_millis() as i64;
        self.current = (self.current * 2).min(self.max);
    }

    /// Record a successful attempt; the next failure starts from the base delay
    pub fn reset(&mut self) {
        self.current = self.base;
        self.ready_at = 0;
    }
}

/// Dispatches improvement triggers to the producer and deploys proposals
pub struct ImprovementDispatcher {
    target_count: usize,
    backoff: ProducerBackoff,
}

impl ImprovementDispatcher {
    pub fn new(target_count: usize, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            target_count,
            backoff: ProducerBackoff::new(backoff_base_ms, backoff_max_ms),
        }
    }

    pub fn backoff(&self) -> &ProducerBackoff {
        &self.backoff
    }

    /// Ready-to-run command for reverting to the previous version; recorded
    /// on the version and carried into review tickets, never executed here.
    fn rollback_reference(task_id: &TaskId, previous: u32) -> String {
        format!("vigil rollback {} --to {}", task_id, previous)
    }

    /// Assemble the producer request for a trigger.
    ///
    /// Fails with `DuplicateWindow` if the task already has an open window;
    /// that trigger should never have been emitted and is dropped.
    pub fn build_request(
        &self,
        trigger: &ImprovementTrigger,
        store: &StateStore,
    ) -> Result<ImprovementRequest> {
        if store.open_window(&trigger.task_id)?.is_some() {
            return Err(VigilError::DuplicateWindow(trigger.task_id.to_string()));
        }

        Ok(ImprovementRequest {
            task_id: trigger.task_id.clone(),
            metrics: trigger.metrics,
            history: store.list_learning(&trigger.task_id)?,
            prior_attempts: store.list_versions(&trigger.task_id)?,
        })
    }

    /// Deploy a producer proposal: append the version, open its window, and
    /// drop the queue entry.
    ///
    /// Re-checks for an open window so racing proposals for one task cannot
    /// both deploy.
    pub fn deploy(
        &self,
        trigger: &ImprovementTrigger,
        proposal: &ProposedChange,
        store: &StateStore,
    ) -> Result<(Version, EvaluationWindow)> {
        let task_id = &trigger.task_id;
        if store.open_window(task_id)?.is_some() {
            return Err(VigilError::DuplicateWindow(task_id.to_string()));
        }

        let previous = store.latest_version_number(task_id)?;
        let version_number = previous + 1;
        let rollback_reference = Self::rollback_reference(task_id, previous);

        let version = Version::deploy(
            task_id.clone(),
            version_number,
            proposal.change_summary.clone(),
            proposal.new_body_reference.clone(),
            trigger.metrics,
            rollback_reference,
        )?;
        store.append_version(&version)?;

        let window = EvaluationWindow::open(task_id.clone(), version_number, self.target_count);
        store.put_window(&window)?;
        store.delete_queue_entry(task_id)?;

        tracing::info!(
            task_id = %task_id,
            version = version_number,
            target = self.target_count,
            "Deployed candidate change, evaluation window open"
        );

        Ok((version, window))
    }

    /// Full dispatch: build the request, call the producer, deploy.
    ///
    /// While the backoff is not ready, or when the producer is unreachable,
    /// returns `ProducerUnavailable`; the caller keeps the trigger queued and
    /// retries on a later cycle.
    pub async fn dispatch(
        &mut self,
        trigger: &ImprovementTrigger,
        producer: &dyn ImprovementProducer,
        store: &StateStore,
    ) -> Result<(Version, EvaluationWindow)> {
        let now = now_ms();
        if !self.backoff.ready(now) {
            return Err(VigilError::ProducerUnavailable(format!(
                "backing off until {}",
                self.backoff.ready_at
            )));
        }

        let request = self.build_request(trigger, store)?;
        match producer.propose(request).await {
            Ok(proposal) => {
                self.backoff.reset();
                self.deploy(trigger, &proposal, store)
            }
            Err(e @ VigilError::ProducerUnavailable(_)) => {
                self.backoff.record_failure(now_ms());
                tracing::warn!(
                    task_id = %trigger.task_id,
                    error = %e,
                    "Producer unavailable, trigger stays queued"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
