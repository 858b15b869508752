//! Append-only execution logs
//!
//! One JSONL file per task per day, the source of truth for execution
//! memories. Metrics are always recomputable from these files, so corruption
//! of any cached aggregate is recoverable by rereading the log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::{ExecutionMemory, TaskId};
use crate::error::Result;

/// Per-task per-day JSONL log of execution memories
pub struct ExecutionLog {
    base_dir: PathBuf,
}

impl ExecutionLog {
    /// Create an execution log rooted at `data_dir/executions`
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = data_dir.as_ref().join("executions");
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Directory holding one task's day files
    fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.base_dir.join(task_id.dir_name())
    }

    /// Day file path for a given start time
    fn day_path(&self, task_id: &TaskId, start_time: i64) -> PathBuf {
        let day = DateTime::<Utc>::from_timestamp_millis(start_time)
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d")
            .to_string();
        self.task_dir(task_id).join(format!("{}.jsonl", day))
    }

    /// Append one memory to the task's current day file.
    ///
    /// A single fallible write; retry policy belongs to the caller (the
    /// Recorder), which treats persistent failure as telemetry-only.
    pub fn append(&self, memory: &ExecutionMemory) -> Result<()> {
        let path = self.day_path(&memory.task_id, memory.start_time);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(memory)?)?;
        Ok(())
    }

    /// Read every memory recorded for a task, oldest first
    pub fn read_all(&self, task_id: &TaskId) -> Result<Vec<ExecutionMemory>> {
        let dir = self.task_dir(task_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        // Day files sort lexicographically in date order
        let mut day_files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|e| e == "jsonl").unwrap_or(false))
            .collect();
        day_files.sort();

        let mut memories = Vec::new();
        for path in day_files {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let memory: ExecutionMemory = serde_json::from_str(&line)?;
                memories.push(memory);
            }
        }

        Ok(memories)
    }

    /// Read the most recent `n` memories for a task, oldest first
    pub fn read_recent(&self, task_id: &TaskId, n: usize) -> Result<Vec<ExecutionMemory>> {
        let mut all = self.read_all(task_id)?;
        if all.len() > n {
            all.drain(..all.len() - n);
        }
        Ok(all)
    }

    /// Total memories recorded for a task
    pub fn count(&self, task_id: &TaskId) -> Result<usize> {
        Ok(self.read_all(task_id)?.len())
    }
}
