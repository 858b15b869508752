//! Vigil - an adaptive task-health control loop
//!
//! Vigil observes repeated invocations of reusable tasks, computes a
//! sliding-window stability signal per task, and closes the loop: unstable
//! tasks get a candidate improvement deployed, evaluated over a fixed window,
//! and either promoted or escalated to a human. Successful executions are
//! harvested into a per-task experience library. Nothing in Vigil ever
//! reverses a deployed change on its own.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod experience;
pub mod id;
pub mod monitor;
pub mod producer;
pub mod recorder;
pub mod store;
pub mod supervisor;
pub mod ticket;

pub use error::{Result, VigilError};
