//! Experience entries
//!
//! Compact records of past successful executions, retained per task for
//! retrieval ahead of future invocations. Each serialized entry fits a fixed
//! byte budget so retrieval cost stays bounded no matter how the corpus grows.

use crate::domain::{Outcome, TaskId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A compact, retrievable record of one successful execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    pub task_id: TaskId,

    /// Hash of the source execution context; doubles as the entry identity
    pub context_hash: String,

    /// Free-text description of what the execution did
    pub description: String,

    pub outcome: Outcome,

    pub duration_ms: u64,

    /// Salient choices made during the execution
    pub key_decisions: Vec<String>,

    /// Admission time, milliseconds since Unix epoch
    pub recorded_at: i64,
}

impl ExperienceEntry {
    /// Hash an execution's identifying context into an entry identity
    pub fn hash_context(memory_id: &str, description: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(memory_id.as_bytes());
        hasher.update(description.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Serialized size of this entry in bytes
    pub fn serialized_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    /// Truncate free-text fields until the serialized entry fits `budget_bytes`.
    ///
    /// Key decisions are dropped from the end first, then the description is
    /// shortened. Structural fields are never touched.
    pub fn truncate_to_budget(&mut self, budget_bytes: usize) {
        while self.serialized_size() > budget_bytes && !self.key_decisions.is_empty() {
            self.key_decisions.pop();
        }
        while self.serialized_size() > budget_bytes && !self.description.is_empty() {
            let keep = self.description.len().saturating_sub(64).max(0);
            let mut cut = keep;
            while cut > 0 && !self.description.is_char_boundary(cut) {
                cut -= 1;
            }
            self.description.truncate(cut);
            if cut == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ExperienceEntry {
        ExperienceEntry {
            task_id: TaskId::parse("etl:ingest").unwrap(),
            context_hash: "abcd1234".to_string(),
            description: "parsed the daily feed and reconciled totals".to_string(),
            outcome: Outcome::Success,
            duration_ms: 420,
            key_decisions: vec!["skipped malformed rows".to_string()],
            recorded_at: 1_738_300_800_123,
        }
    }

    #[test]
    fn test_hash_context_is_stable() {
        let a = ExperienceEntry::hash_context("mem-1", "desc");
        let b = ExperienceEntry::hash_context("mem-1", "desc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_hash_context_differs_by_input() {
        let a = ExperienceEntry::hash_context("mem-1", "desc");
        let b = ExperienceEntry::hash_context("mem-2", "desc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_serialized_size_nonzero() {
        assert!(entry().serialized_size() > 0);
    }

    #[test]
    fn test_truncate_within_budget_is_noop() {
        let mut e = entry();
        let before = e.clone();
        e.truncate_to_budget(10_000);
        assert_eq!(e, before);
    }

    #[test]
    fn test_truncate_drops_decisions_first() {
        let mut e = entry();
        e.key_decisions = (0..50).map(|i| format!("decision number {}", i)).collect();
        let budget = 600;
        e.truncate_to_budget(budget);
        assert!(e.serialized_size() <= budget);
        assert!(e.key_decisions.len() < 50);
        // Description survives when dropping decisions is enough
        assert!(!e.description.is_empty());
    }

    #[test]
    fn test_truncate_shortens_description_when_needed() {
        let mut e = entry();
        e.key_decisions.clear();
        e.description = "x".repeat(5000);
        let budget = 400;
        e.truncate_to_budget(budget);
        assert!(e.serialized_size() <= budget);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let e = entry();
        let json = serde_json::to_string(&e).unwrap();
        let parsed: ExperienceEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, e);
    }
}
