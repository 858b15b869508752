//! Improvement producer interface
//!
//! The producer is the external entity that turns "this task is unstable"
//! into a concrete candidate change. It is opaque here: callers hand it the
//! task's current metrics plus everything learned from prior attempts, and
//! get back a summary and a reference to the new task body.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ContinualMetrics, EvaluationRecord, TaskId, Version};
use crate::error::Result;

/// Everything a producer gets to work with for one improvement attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementRequest {
    pub task_id: TaskId,

    /// Metrics at the time of the trigger
    pub metrics: ContinualMetrics,

    /// Full evaluation history for the task, oldest first
    pub history: Vec<EvaluationRecord>,

    /// Prior deployed versions, oldest first
    pub prior_attempts: Vec<Version>,
}

/// A candidate change proposed by the producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    /// Summary of what changed and why
    pub change_summary: String,

    /// Opaque reference to the new task body
    pub new_body_reference: String,
}

/// External producer of candidate changes
#[async_trait]
pub trait ImprovementProducer: Send + Sync {
    /// Propose a change for an unstable task.
    ///
    /// Returns `VigilError::ProducerUnavailable` when the producer cannot be
    /// reached; the caller backs off and retries without dropping the trigger.
    async fn propose(&self, request: ImprovementRequest) -> Result<ProposedChange>;
}

/// Producer backed by an external command.
///
/// The command receives the request as JSON on stdin and must print a
/// `ProposedChange` as JSON on stdout. Any spawn failure, non-zero exit, or
/// unparseable output is reported as `ProducerUnavailable` so the trigger
/// stays queued.
pub struct ScriptProducer {
    command: Option<String>,
}

impl ScriptProducer {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ImprovementProducer for ScriptProducer {
    async fn propose(&self, request: ImprovementRequest) -> Result<ProposedChange> {
        use crate::error::VigilError;
        use tokio::io::AsyncWriteExt;

        let Some(command) = &self.command else {
            return Err(VigilError::ProducerUnavailable(
                "no producer command configured".to_string(),
            ));
        };

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| VigilError::ProducerUnavailable(format!("spawn failed: {}", e)))?;

        let payload = serde_json::to_vec(&request)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| VigilError::ProducerUnavailable(format!("write failed: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| VigilError::ProducerUnavailable(format!("wait failed: {}", e)))?;
        if !output.status.success() {
            return Err(VigilError::ProducerUnavailable(format!(
                "producer command exited with {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| VigilError::ProducerUnavailable(format!("unparseable proposal: {}", e)))
    }
}

/// Scripted producer for tests: fails a set number of times, then returns a
/// fixed proposal, recording every request it receives.
pub struct MockProducer {
    proposal: ProposedChange,
    failures_before_success: std::sync::atomic::AtomicU32,
    requests: std::sync::Mutex<Vec<ImprovementRequest>>,
}

impl MockProducer {
    pub fn new(change_summary: &str, new_body_reference: &str) -> Self {
        Self {
            proposal: ProposedChange {
                change_summary: change_summary.to_string(),
                new_body_reference: new_body_reference.to_string(),
            },
            failures_before_success: std::sync::atomic::AtomicU32::new(0),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Make the next `n` calls fail with `ProducerUnavailable`
    pub fn fail_next(self, n: u32) -> Self {
        self.failures_before_success
            .store(n, std::sync::atomic::Ordering::SeqCst);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ImprovementRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImprovementProducer for MockProducer {
    async fn propose(&self, request: ImprovementRequest) -> Result<ProposedChange> {
        self.requests.lock().unwrap().push(request);

        let remaining = self
            .failures_before_success
            .load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success
                .store(remaining - 1, std::sync::atomic::Ordering::SeqCst);
            return Err(crate::error::VigilError::ProducerUnavailable(
                "scripted failure".to_string(),
            ));
        }

        Ok(self.proposal.clone())
    }
}
