//! Core data model for the task-health control loop

pub mod execution;
pub mod experience;
pub mod learning;
pub mod metrics;
pub mod queue;
pub mod task;
pub mod version;
pub mod window;

pub use execution::{ExecutionMemory, Outcome};
pub use experience::ExperienceEntry;
pub use learning::{EvaluationDecision, EvaluationRecord};
pub use metrics::ContinualMetrics;
pub use queue::QueueEntry;
pub use task::TaskId;
pub use version::{Version, VersionStatus};
pub use window::{EvaluationWindow, WindowStatus};
