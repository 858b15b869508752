//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - daemon: run the control loop in the foreground
//! - ingest: record one completed execution
//! - status: show a task's metrics, queue entry, and window
//! - windows: list open evaluation windows
//! - experience: retrieve experience entries for a query

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil - an adaptive task-health control loop
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop in the foreground
    Daemon,

    /// Record one completed execution
    Ingest {
        /// Task id (namespace:name)
        #[arg(short, long)]
        task: String,

        /// Execution outcome (success, failure, partial)
        #[arg(short, long)]
        outcome: String,

        /// Accuracy score in [0, 1]
        #[arg(short, long)]
        accuracy: f64,

        /// Duration in milliseconds
        #[arg(short, long)]
        duration_ms: u64,

        /// Free-text description of what the execution did
        #[arg(long)]
        note: Option<String>,
    },

    /// Show metrics, queue entry, versions, and window for a task
    Status {
        /// Task id (namespace:name)
        task: String,
    },

    /// List open evaluation windows
    Windows,

    /// Retrieve experience entries relevant to a query
    Experience {
        /// Task id (namespace:name)
        task: String,

        /// Free-text query
        query: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_daemon_command() {
        let cli = Cli::try_parse_from(["vigil", "daemon"]).unwrap();
        assert!(matches!(cli.command, Commands::Daemon));
        assert!(!cli.is_verbose());
    }

    #[test]
    fn test_ingest_command() {
        let cli = Cli::try_parse_from([
            "vigil", "ingest", "-t", "etl:ingest", "-o", "success", "-a", "0.9", "-d", "120",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest {
                task,
                outcome,
                accuracy,
                duration_ms,
                note,
            } => {
                assert_eq!(task, "etl:ingest");
                assert_eq!(outcome, "success");
                assert_eq!(accuracy, 0.9);
                assert_eq!(duration_ms, 120);
                assert!(note.is_none());
            }
            _ => panic!("Expected ingest command"),
        }
    }

    #[test]
    fn test_ingest_with_note() {
        let cli = Cli::try_parse_from([
            "vigil",
            "ingest",
            "-t",
            "etl:ingest",
            "-o",
            "success",
            "-a",
            "1.0",
            "-d",
            "80",
            "--note",
            "reconciled the ledger",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest { note, .. } => {
                assert_eq!(note, Some("reconciled the ledger".to_string()));
            }
            _ => panic!("Expected ingest command"),
        }
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::try_parse_from(["vigil", "status", "etl:ingest"]).unwrap();
        match cli.command {
            Commands::Status { task } => assert_eq!(task, "etl:ingest"),
            _ => panic!("Expected status command"),
        }
    }

    #[test]
    fn test_windows_command() {
        let cli = Cli::try_parse_from(["vigil", "windows"]).unwrap();
        assert!(matches!(cli.command, Commands::Windows));
    }

    #[test]
    fn test_experience_command() {
        let cli = Cli::try_parse_from(["vigil", "experience", "etl:ingest", "ledger totals"]).unwrap();
        match cli.command {
            Commands::Experience { task, query } => {
                assert_eq!(task, "etl:ingest");
                assert_eq!(query, "ledger totals");
            }
            _ => panic!("Expected experience command"),
        }
    }

    #[test]
    fn test_config_option() {
        let cli = Cli::try_parse_from(["vigil", "-c", "/path/to/vigil.yml", "windows"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/vigil.yml")));
    }

    #[test]
    fn test_verbose_flag() {
        let cli = Cli::try_parse_from(["vigil", "-v", "windows"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_help_works() {
        Cli::command().debug_assert();
    }
}
