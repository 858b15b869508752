//! CLI module for vigil - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the daemon,
//! recording executions, and inspecting control-loop state.

pub mod commands;

pub use commands::Cli;
