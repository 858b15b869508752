//! Task identifiers
//!
//! A task is a reusable, independently invocable unit of work named by an
//! opaque `namespace:name` string. All mutable control-loop state partitions
//! by this identifier.

use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque `namespace:name` identifier for a reusable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Parse a task id, requiring the `namespace:name` form with non-empty parts
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((namespace, name)) = raw.split_once(':') else {
            return Err(VigilError::InvalidTaskId(raw.to_string()));
        };
        if namespace.is_empty() || name.is_empty() || name.contains(':') {
            return Err(VigilError::InvalidTaskId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// The full `namespace:name` string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part (before the colon)
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// The name part (after the colon)
    pub fn name(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or(&self.0)
    }

    /// Filesystem-safe directory name for this task's stores
    ///
    /// Format: `{sanitized}-{hash8}`; the hash keeps distinct ids distinct
    /// even when sanitization collides.
    pub fn dir_name(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        format!("{}-{}", sanitized, hex::encode(&digest[..4]))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
