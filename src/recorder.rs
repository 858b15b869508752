//! Execution Recorder
//!
//! Durably records exactly one memory per completed task invocation. Nothing
//! is written between `begin` and `end`, so a crash mid-invocation leaves no
//! record rather than a corrupt one. Write failures retry with bounded
//! backoff and are then surfaced as telemetry-only failures; the task itself
//! is never blocked on its own bookkeeping.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{ExecutionMemory, Outcome, TaskId};
use crate::error::{Result, VigilError};
use crate::id::{generate_memory_id, now_ms};
use crate::store::ExecutionLog;

/// Handle for an in-flight invocation, issued by `begin`
#[derive(Debug, Clone)]
pub struct ExecutionToken {
    pub memory_id: String,
    pub task_id: TaskId,
    pub start_time: i64,
}

/// Records execution memories to the append-only log
pub struct ExecutionRecorder {
    log: ExecutionLog,
    /// Last start timestamp issued per task; enforces monotonic ordering
    last_start: HashMap<TaskId, i64>,
    write_retries: u32,
    write_backoff: Duration,
}

impl ExecutionRecorder {
    pub fn new(log: ExecutionLog, write_retries: u32, write_backoff_ms: u64) -> Self {
        Self {
            log,
            last_start: HashMap::new(),
            write_retries,
            write_backoff: Duration::from_millis(write_backoff_ms),
        }
    }

    /// Start tracking an invocation. No record exists until `end` is called.
    pub fn begin(&mut self, task_id: TaskId) -> ExecutionToken {
        let start_time = self.monotonic_now(&task_id);
        ExecutionToken {
            memory_id: generate_memory_id(),
            task_id,
            start_time,
        }
    }

    /// Complete an invocation, producing its immutable memory.
    ///
    /// The memory is returned even if the log write ultimately fails; a lost
    /// telemetry line must not fail the task that produced it.
    pub fn end(&mut self, token: ExecutionToken, outcome: Outcome, accuracy: f64) -> Result<ExecutionMemory> {
        let duration_ms = (now_ms() - token.start_time).max(0) as u64;
        let memory = ExecutionMemory {
            id: token.memory_id,
            task_id: token.task_id,
            start_time: token.start_time,
            duration_ms,
            outcome,
            accuracy: accuracy.clamp(0.0, 1.0),
        };
        self.persist_or_drop(&memory);
        Ok(memory)
    }

    /// Record a completed invocation in one call, with the executor-supplied
    /// duration. Backs the inbound `record_execution` interface.
    pub fn record(
        &mut self,
        task_id: TaskId,
        outcome: Outcome,
        accuracy: f64,
        duration_ms: u64,
    ) -> Result<ExecutionMemory> {
        let start_time = self.monotonic_now(&task_id);
        let memory = ExecutionMemory {
            id: generate_memory_id(),
            task_id,
            start_time,
            duration_ms,
            outcome,
            accuracy: accuracy.clamp(0.0, 1.0),
        };
        self.persist_or_drop(&memory);
        Ok(memory)
    }

    /// Read access to the underlying log
    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Current time, clamped so per-task start times strictly increase
    fn monotonic_now(&mut self, task_id: &TaskId) -> i64 {
        let now = now_ms();
        let last = self.last_start.get(task_id).copied().unwrap_or(0);
        let start = now.max(last + 1);
        self.last_start.insert(task_id.clone(), start);
        start
    }

    /// Persist the memory; a telemetry write failure is logged and dropped
    fn persist_or_drop(&self, memory: &ExecutionMemory) {
        if let Err(e) = self.persist(memory) {
            tracing::warn!(
                memory_id = %memory.id,
                task_id = %memory.task_id,
                error = %e,
                "Dropping telemetry after failed log writes"
            );
        }
    }

    /// Append with bounded exponential backoff
    fn persist(&self, memory: &ExecutionMemory) -> Result<()> {
        let mut delay = self.write_backoff;
        for attempt in 1..=self.write_retries.max(1) {
            match self.log.append(memory) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.write_retries => {
                    tracing::debug!(
                        memory_id = %memory.id,
                        attempt,
                        error = %e,
                        "Execution log write failed, retrying"
                    );
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(e) => return Err(VigilError::TelemetryWrite(e.to_string())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task() -> TaskId {
        TaskId::parse("etl:ingest").unwrap()
    }

    fn recorder(temp: &TempDir) -> ExecutionRecorder {
        let log = ExecutionLog::new(temp.path()).unwrap();
        ExecutionRecorder::new(log, 3, 1)
    }

    #[test]
    fn test_begin_end_produces_one_record() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        let token = rec.begin(task());
        let memory = rec.end(token, Outcome::Success, 0.9).unwrap();

        assert_eq!(memory.outcome, Outcome::Success);
        assert_eq!(memory.accuracy, 0.9);

        let logged = rec.log().read_all(&task()).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].id, memory.id);
    }

    #[test]
    fn test_begin_without_end_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        let _token = rec.begin(task());

        assert!(rec.log().read_all(&task()).unwrap().is_empty());
    }

    #[test]
    fn test_record_uses_supplied_duration() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        let memory = rec.record(task(), Outcome::Partial, 0.5, 1234).unwrap();
        assert_eq!(memory.duration_ms, 1234);
        assert_eq!(memory.outcome, Outcome::Partial);

        let logged = rec.log().read_all(&task()).unwrap();
        assert_eq!(logged.len(), 1);
    }

    #[test]
    fn test_per_task_timestamps_are_monotonic() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        let mut last = 0;
        for _ in 0..20 {
            let memory = rec.record(task(), Outcome::Success, 1.0, 1).unwrap();
            assert!(memory.start_time > last);
            last = memory.start_time;
        }
    }

    #[test]
    fn test_accuracy_is_clamped() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        let high = rec.record(task(), Outcome::Success, 1.7, 1).unwrap();
        assert_eq!(high.accuracy, 1.0);

        let low = rec.record(task(), Outcome::Failure, -0.3, 1).unwrap();
        assert_eq!(low.accuracy, 0.0);
    }

    #[test]
    fn test_tasks_do_not_share_timestamp_state() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);
        let other = TaskId::parse("reports:weekly").unwrap();

        rec.record(task(), Outcome::Success, 1.0, 1).unwrap();
        let memory = rec.record(other.clone(), Outcome::Success, 1.0, 1).unwrap();

        assert_eq!(rec.log().read_all(&other).unwrap().len(), 1);
        assert_eq!(memory.task_id, other);
    }

    #[test]
    fn test_failed_writes_still_return_the_memory() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        // Make the log root unwritable so appends fail
        let root = temp.path().join("executions");
        let mut perms = std::fs::metadata(&root).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&root, perms.clone()).unwrap();

        let memory = rec.record(task(), Outcome::Success, 0.9, 1).unwrap();
        assert_eq!(memory.outcome, Outcome::Success);
        assert_eq!(memory.accuracy, 0.9);

        perms.set_readonly(false);
        std::fs::set_permissions(&root, perms).unwrap();
    }

    #[test]
    fn test_distinct_memory_ids() {
        let temp = TempDir::new().unwrap();
        let mut rec = recorder(&temp);

        let a = rec.record(task(), Outcome::Success, 1.0, 1).unwrap();
        let b = rec.record(task(), Outcome::Success, 1.0, 1).unwrap();
        assert_ne!(a.id, b.id);
    }
}
