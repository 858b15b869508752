//! SQLite state store for control-loop state
//!
//! Holds the per-task aggregate metrics record, the improvement queue, the
//! append-only version history, evaluation windows, the capped experience
//! store, and the permanent learning log. Execution memories themselves live
//! in the append-only JSONL logs (`execution_log`); everything in this store
//! is either derived from them or append-only bookkeeping.

use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;

use crate::domain::{
    ContinualMetrics, EvaluationRecord, EvaluationWindow, ExperienceEntry, QueueEntry, TaskId,
    Version, VersionStatus,
};
use crate::error::{Result, VigilError};

/// SQLite-backed store for everything except raw execution memories
pub struct StateStore {
    db: Connection,
}

impl StateStore {
    /// Open or create the state store at `data_dir/state.db`
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let db = Connection::open(data_dir.join("state.db"))?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                task_id TEXT PRIMARY KEY,
                stability_gap REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS queue (
                task_id TEXT PRIMARY KEY,
                flagged_count INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS versions (
                task_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (task_id, version_number)
            );

            CREATE TABLE IF NOT EXISTS windows (
                task_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (task_id, version_number)
            );

            CREATE TABLE IF NOT EXISTS experience (
                task_id TEXT NOT NULL,
                context_hash TEXT NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (task_id, context_hash)
            );

            CREATE TABLE IF NOT EXISTS learning_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_versions_status ON versions(status);
            CREATE INDEX IF NOT EXISTS idx_windows_status ON windows(status);
            CREATE INDEX IF NOT EXISTS idx_learning_task ON learning_log(task_id);
            "#,
        )?;
        Ok(())
    }

    //=== Metrics ===

    /// Store the current aggregate metrics for a task
    pub fn put_metrics(&self, task_id: &TaskId, metrics: &ContinualMetrics) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO metrics (task_id, stability_gap, sample_count, json_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                task_id.as_str(),
                metrics.stability_gap,
                metrics.sample_count as i64,
                serde_json::to_string(metrics)?,
            ],
        )?;
        Ok(())
    }

    /// Get the cached aggregate metrics for a task
    pub fn get_metrics(&self, task_id: &TaskId) -> Result<Option<ContinualMetrics>> {
        self.get_json("SELECT json_data FROM metrics WHERE task_id = ?1", task_id.as_str())
    }

    //=== Improvement queue ===

    /// Create or replace the queue entry for a task
    pub fn put_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO queue (task_id, flagged_count, json_data) VALUES (?1, ?2, ?3)",
            params![
                entry.task_id.as_str(),
                entry.flagged_count,
                serde_json::to_string(entry)?,
            ],
        )?;
        Ok(())
    }

    /// Get the queue entry for a task, if any
    pub fn get_queue_entry(&self, task_id: &TaskId) -> Result<Option<QueueEntry>> {
        self.get_json("SELECT json_data FROM queue WHERE task_id = ?1", task_id.as_str())
    }

    /// Remove a task's queue entry (stable again, or trigger emitted)
    pub fn delete_queue_entry(&self, task_id: &TaskId) -> Result<()> {
        self.db
            .execute("DELETE FROM queue WHERE task_id = ?1", [task_id.as_str()])?;
        Ok(())
    }

    /// List all queued tasks
    pub fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        self.list_json("SELECT json_data FROM queue ORDER BY task_id")
    }

    //=== Versions ===

    /// Append a version to a task's history.
    ///
    /// Version history is append-only; re-inserting an existing version
    /// number is an error.
    pub fn append_version(&self, version: &Version) -> Result<()> {
        let inserted = self.db.execute(
            "INSERT OR IGNORE INTO versions (task_id, version_number, status, json_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                version.task_id.as_str(),
                version.version_number,
                version.status.as_str(),
                serde_json::to_string(version)?,
            ],
        )?;
        if inserted == 0 {
            return Err(VigilError::InvalidState(format!(
                "version {} already exists for {}",
                version.version_number, version.task_id
            )));
        }
        Ok(())
    }

    /// Update the status of an existing version (the only mutable field)
    pub fn set_version_status(
        &self,
        task_id: &TaskId,
        version_number: u32,
        status: VersionStatus,
    ) -> Result<()> {
        let mut version = self
            .get_version(task_id, version_number)?
            .ok_or_else(|| VigilError::NotFound(format!("version {} for {}", version_number, task_id)))?;
        version.status = status;

        self.db.execute(
            "UPDATE versions SET status = ?1, json_data = ?2 WHERE task_id = ?3 AND version_number = ?4",
            params![
                status.as_str(),
                serde_json::to_string(&version)?,
                task_id.as_str(),
                version_number,
            ],
        )?;
        Ok(())
    }

    /// Get one version of a task
    pub fn get_version(&self, task_id: &TaskId, version_number: u32) -> Result<Option<Version>> {
        let result = self.db.query_row(
            "SELECT json_data FROM versions WHERE task_id = ?1 AND version_number = ?2",
            params![task_id.as_str(), version_number],
            |row| row.get::<_, String>(0),
        );
        Self::optional_json(result)
    }

    /// List a task's versions, oldest first
    pub fn list_versions(&self, task_id: &TaskId) -> Result<Vec<Version>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM versions WHERE task_id = ?1 ORDER BY version_number")?;
        let rows = stmt.query_map([task_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(serde_json::from_str(&row?)?);
        }
        Ok(versions)
    }

    /// Highest version number recorded for a task (0 when none)
    pub fn latest_version_number(&self, task_id: &TaskId) -> Result<u32> {
        let n: Option<i64> = self.db.query_row(
            "SELECT MAX(version_number) FROM versions WHERE task_id = ?1",
            [task_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(n.unwrap_or(0) as u32)
    }

    //=== Evaluation windows ===

    /// Store a window (insert or update in place)
    pub fn put_window(&self, window: &EvaluationWindow) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO windows (task_id, version_number, status, json_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                window.task_id.as_str(),
                window.version_number,
                window.status.as_str(),
                serde_json::to_string(window)?,
            ],
        )?;
        Ok(())
    }

    /// Get the open (evaluating or stalled) window for a task, if any
    pub fn open_window(&self, task_id: &TaskId) -> Result<Option<EvaluationWindow>> {
        let result = self.db.query_row(
            "SELECT json_data FROM windows
             WHERE task_id = ?1 AND status IN ('evaluating', 'stalled')",
            [task_id.as_str()],
            |row| row.get::<_, String>(0),
        );
        Self::optional_json(result)
    }

    /// List all open windows system-wide (read-only projection)
    pub fn list_open_windows(&self) -> Result<Vec<EvaluationWindow>> {
        self.list_json(
            "SELECT json_data FROM windows WHERE status IN ('evaluating', 'stalled') ORDER BY task_id",
        )
    }

    /// Count open windows system-wide (read-only projection)
    pub fn count_open_windows(&self) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM windows WHERE status IN ('evaluating', 'stalled')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    //=== Experience ===

    /// Store an experience entry (insert or replace by context hash)
    pub fn put_experience(&self, entry: &ExperienceEntry) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO experience (task_id, context_hash, json_data) VALUES (?1, ?2, ?3)",
            params![
                entry.task_id.as_str(),
                entry.context_hash,
                serde_json::to_string(entry)?,
            ],
        )?;
        Ok(())
    }

    /// Delete one experience entry
    pub fn delete_experience(&self, task_id: &TaskId, context_hash: &str) -> Result<()> {
        self.db.execute(
            "DELETE FROM experience WHERE task_id = ?1 AND context_hash = ?2",
            params![task_id.as_str(), context_hash],
        )?;
        Ok(())
    }

    /// List a task's experience entries
    pub fn list_experience(&self, task_id: &TaskId) -> Result<Vec<ExperienceEntry>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM experience WHERE task_id = ?1")?;
        let rows = stmt.query_map([task_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(entries)
    }

    //=== Learning log ===

    /// Append an evaluation record to the permanent learning log
    pub fn append_learning(&self, record: &EvaluationRecord) -> Result<()> {
        self.db.execute(
            "INSERT INTO learning_log (task_id, recorded_at, json_data) VALUES (?1, ?2, ?3)",
            params![
                record.task_id.as_str(),
                record.recorded_at,
                serde_json::to_string(record)?,
            ],
        )?;
        Ok(())
    }

    /// List a task's learning history, oldest first
    pub fn list_learning(&self, task_id: &TaskId) -> Result<Vec<EvaluationRecord>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM learning_log WHERE task_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map([task_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }

    //=== Helpers ===

    fn get_json<T: serde::de::DeserializeOwned>(&self, sql: &str, key: &str) -> Result<Option<T>> {
        let result = self.db.query_row(sql, [key], |row| row.get::<_, String>(0));
        Self::optional_json(result)
    }

    fn list_json<T: serde::de::DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let mut stmt = self.db.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(serde_json::from_str(&row?)?);
        }
        Ok(items)
    }

    fn optional_json<T: serde::de::DeserializeOwned>(
        result: std::result::Result<String, rusqlite::Error>,
    ) -> Result<Option<T>> {
        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WindowStatus;

    fn task() -> TaskId {
        TaskId::parse("etl:ingest").unwrap()
    }

    fn metrics(gap: f64) -> ContinualMetrics {
        ContinualMetrics {
            avg_accuracy: 0.8,
            worst_case_accuracy: 0.8 - gap,
            stability_gap: gap,
            sample_count: 10,
        }
    }

    fn version(n: u32) -> Version {
        Version::deploy(
            task(),
            n,
            "change".to_string(),
            format!("bodies/v{}.md", n),
            metrics(0.15),
            format!("vigil rollback etl:ingest --to {}", n.saturating_sub(1)),
        )
        .unwrap()
    }

    #[test]
    fn test_metrics_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_metrics(&task()).unwrap().is_none());

        store.put_metrics(&task(), &metrics(0.2)).unwrap();
        let got = store.get_metrics(&task()).unwrap().unwrap();
        assert_eq!(got.stability_gap, 0.2);

        // Replace, not duplicate
        store.put_metrics(&task(), &metrics(0.3)).unwrap();
        let got = store.get_metrics(&task()).unwrap().unwrap();
        assert_eq!(got.stability_gap, 0.3);
    }

    #[test]
    fn test_queue_entry_lifecycle() {
        let store = StateStore::open_in_memory().unwrap();
        let entry = QueueEntry::new(task(), 0.4, 1, vec!["mem-1".to_string()]);

        store.put_queue_entry(&entry).unwrap();
        let got = store.get_queue_entry(&task()).unwrap().unwrap();
        assert_eq!(got.flagged_count, 1);

        store.delete_queue_entry(&task()).unwrap();
        assert!(store.get_queue_entry(&task()).unwrap().is_none());
    }

    #[test]
    fn test_list_queue() {
        let store = StateStore::open_in_memory().unwrap();
        let other = TaskId::parse("reports:weekly").unwrap();

        store
            .put_queue_entry(&QueueEntry::new(task(), 0.4, 1, vec![]))
            .unwrap();
        store
            .put_queue_entry(&QueueEntry::new(other, 0.6, 1, vec![]))
            .unwrap();

        assert_eq!(store.list_queue().unwrap().len(), 2);
    }

    #[test]
    fn test_version_history_is_append_only() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_version(&version(1)).unwrap();

        // Same version number refused
        assert!(store.append_version(&version(1)).is_err());

        store.append_version(&version(2)).unwrap();
        assert_eq!(store.latest_version_number(&task()).unwrap(), 2);
        assert_eq!(store.list_versions(&task()).unwrap().len(), 2);
    }

    #[test]
    fn test_latest_version_number_empty() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.latest_version_number(&task()).unwrap(), 0);
    }

    #[test]
    fn test_set_version_status() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_version(&version(1)).unwrap();

        store
            .set_version_status(&task(), 1, VersionStatus::Promoted)
            .unwrap();

        let got = store.get_version(&task(), 1).unwrap().unwrap();
        assert_eq!(got.status, VersionStatus::Promoted);
    }

    #[test]
    fn test_set_version_status_missing_version() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.set_version_status(&task(), 9, VersionStatus::Promoted);
        assert!(matches!(result, Err(VigilError::NotFound(_))));
    }

    #[test]
    fn test_open_window_lookup() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.open_window(&task()).unwrap().is_none());

        let window = EvaluationWindow::open(task(), 1, 10);
        store.put_window(&window).unwrap();

        let got = store.open_window(&task()).unwrap().unwrap();
        assert_eq!(got.version_number, 1);
        assert_eq!(got.status, WindowStatus::Evaluating);
    }

    #[test]
    fn test_closed_window_not_open() {
        let store = StateStore::open_in_memory().unwrap();
        let mut window = EvaluationWindow::open(task(), 1, 10);
        window.status = WindowStatus::Promoted;
        store.put_window(&window).unwrap();

        assert!(store.open_window(&task()).unwrap().is_none());
    }

    #[test]
    fn test_stalled_window_still_open() {
        let store = StateStore::open_in_memory().unwrap();
        let mut window = EvaluationWindow::open(task(), 1, 10);
        window.status = WindowStatus::Stalled;
        store.put_window(&window).unwrap();

        assert!(store.open_window(&task()).unwrap().is_some());
    }

    #[test]
    fn test_window_projections() {
        let store = StateStore::open_in_memory().unwrap();
        let other = TaskId::parse("reports:weekly").unwrap();

        store.put_window(&EvaluationWindow::open(task(), 1, 10)).unwrap();
        store.put_window(&EvaluationWindow::open(other, 1, 10)).unwrap();

        assert_eq!(store.count_open_windows().unwrap(), 2);
        assert_eq!(store.list_open_windows().unwrap().len(), 2);
    }

    #[test]
    fn test_experience_roundtrip_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let entry = ExperienceEntry {
            task_id: task(),
            context_hash: "abcd".to_string(),
            description: "did the thing".to_string(),
            outcome: crate::domain::Outcome::Success,
            duration_ms: 100,
            key_decisions: vec![],
            recorded_at: 1,
        };

        store.put_experience(&entry).unwrap();
        assert_eq!(store.list_experience(&task()).unwrap().len(), 1);

        store.delete_experience(&task(), "abcd").unwrap();
        assert!(store.list_experience(&task()).unwrap().is_empty());
    }

    #[test]
    fn test_learning_log_appends_in_order() {
        let store = StateStore::open_in_memory().unwrap();

        for n in 1..=3 {
            store
                .append_learning(&EvaluationRecord {
                    task_id: task(),
                    version_number: n,
                    baseline_metrics: metrics(0.15),
                    post_metrics: metrics(0.08),
                    decision: crate::domain::EvaluationDecision::Promoted,
                    recorded_at: n as i64,
                })
                .unwrap();
        }

        let history = store.list_learning(&task()).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].version_number, 1);
        assert_eq!(history[2].version_number, 3);
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp = tempfile::TempDir::new().unwrap();

        {
            let store = StateStore::open(temp.path()).unwrap();
            store.put_metrics(&task(), &metrics(0.25)).unwrap();
        }

        {
            let store = StateStore::open(temp.path()).unwrap();
            let got = store.get_metrics(&task()).unwrap().unwrap();
            assert_eq!(got.stability_gap, 0.25);
        }
    }
}
