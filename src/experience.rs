//! Experience Library
//!
//! Harvests successful executions into compact, retrievable entries so future
//! invocations of a task can consult what worked before. Admission is strict,
//! retention is capped per task, and retrieval is deterministic keyword
//! overlap. No embeddings, no network.

use std::collections::HashSet;

use crate::config::ExperienceConfig;
use crate::domain::{ExecutionMemory, ExperienceEntry, Outcome, TaskId};
use crate::error::Result;
use crate::id::now_ms;
use crate::store::StateStore;

const RECENCY_WEIGHT: f64 = 0.7;
const SUCCESS_WEIGHT: f64 = 0.3;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Capped per-task store of successful-execution records
pub struct ExperienceLibrary {
    cap_per_task: usize,
    entry_budget_bytes: usize,
    retrieval_limit: usize,
    duration_multiple: f64,
}

impl ExperienceLibrary {
    pub fn new(config: &ExperienceConfig) -> Self {
        Self {
            cap_per_task: config.cap_per_task,
            entry_budget_bytes: config.entry_budget_bytes,
            retrieval_limit: config.retrieval_limit,
            duration_multiple: config.duration_multiple,
        }
    }

    /// Consider one execution for admission.
    ///
    /// Admitted when the outcome is success and the duration is within the
    /// configured multiple of the task's historical average (executions with
    /// no history to compare against are admitted). Returns whether the entry
    /// was stored.
    pub fn admit(
        &self,
        memory: &ExecutionMemory,
        description: &str,
        key_decisions: Vec<String>,
        avg_duration_ms: Option<f64>,
        store: &StateStore,
    ) -> Result<bool> {
        if memory.outcome != Outcome::Success {
            return Ok(false);
        }
        if let Some(avg) = avg_duration_ms {
            if avg > 0.0 && memory.duration_ms as f64 > self.duration_multiple * avg {
                tracing::debug!(
                    task_id = %memory.task_id,
                    duration_ms = memory.duration_ms,
                    avg_ms = avg,
                    "Execution too slow for experience admission"
                );
                return Ok(false);
            }
        }

        let mut entry = ExperienceEntry {
            task_id: memory.task_id.clone(),
            context_hash: ExperienceEntry::hash_context(&memory.id, description),
            description: description.to_string(),
            outcome: memory.outcome,
            duration_ms: memory.duration_ms,
            key_decisions,
            recorded_at: now_ms(),
        };
        entry.truncate_to_budget(self.entry_budget_bytes);

        store.put_experience(&entry)?;
        self.enforce_cap(&memory.task_id, store)?;
        Ok(true)
    }

    /// Retrieve up to the configured limit of entries relevant to a free-text
    /// description, most relevant first. Entries sharing no keyword with the
    /// query are never returned.
    pub fn retrieve(
        &self,
        task_id: &TaskId,
        query: &str,
        store: &StateStore,
    ) -> Result<Vec<ExperienceEntry>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, ExperienceEntry)> = store
            .list_experience(task_id)?
            .into_iter()
            .filter_map(|entry| {
                let score = keyword_overlap(&query_tokens, &entry);
                (score > 0.0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.recorded_at.cmp(&a.1.recorded_at))
        });

        Ok(scored
            .into_iter()
            .take(self.retrieval_limit)
            .map(|(_, entry)| entry)
            .collect())
    }

    /// Evict the lowest-scoring entries until the task is back under its cap
    fn enforce_cap(&self, task_id: &TaskId, store: &StateStore) -> Result<()> {
        let mut entries = store.list_experience(task_id)?;
        if entries.len() <= self.cap_per_task {
            return Ok(());
        }

        let now = now_ms();
        entries.sort_by(|a, b| {
            composite_score(a, now)
                .partial_cmp(&composite_score(b, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let excess = entries.len() - self.cap_per_task;
        for entry in entries.iter().take(excess) {
            tracing::debug!(
                task_id = %task_id,
                context_hash = %entry.context_hash,
                "Evicting lowest-scoring experience entry"
            );
            store.delete_experience(task_id, &entry.context_hash)?;
        }
        Ok(())
    }
}

/// Retention score: recency dominates, outcome quality breaks ties
fn composite_score(entry: &ExperienceEntry, now: i64) -> f64 {
    let age_days = (now - entry.recorded_at).max(0) as f64 / MS_PER_DAY;
    let recency = 1.0 / (1.0 + age_days);
    let success = match entry.outcome {
        Outcome::Success => 1.0,
        Outcome::Partial => 0.5,
        Outcome::Failure => 0.0,
    };
    RECENCY_WEIGHT * recency + SUCCESS_WEIGHT * success
}

/// Fraction of query tokens present in the entry's text fields
fn keyword_overlap(query_tokens: &HashSet<String>, entry: &ExperienceEntry) -> f64 {
    let mut entry_tokens = tokenize(&entry.description);
    for decision in &entry.key_decisions {
        entry_tokens.extend(tokenize(decision));
    }

    let hits = query_tokens
        .iter()
        .filter(|t| entry_tokens.contains(*t))
        .count();
    hits as f64 / query_tokens.len() as f64
}

/// Lowercase alphanumeric word tokens
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
