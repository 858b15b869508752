//! Persistence layer
//!
//! Two stores with one rule between them: the per-task per-day JSONL
//! execution logs are the source of truth, and the SQLite state store holds
//! only derived aggregates and append-only bookkeeping that can be checked
//! against (or rebuilt from) the logs.

pub mod execution_log;
pub mod state_store;

pub use execution_log::ExecutionLog;
pub use state_store::StateStore;
