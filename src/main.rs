use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use vigil::config::Config;
use vigil::domain::{Outcome, TaskId};
use vigil::engine::HealthEngine;
use vigil::error::VigilError;
use vigil::experience::ExperienceLibrary;
use vigil::producer::ScriptProducer;
use vigil::store::StateStore;
use vigil::ticket::LogTicketSink;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("vigil.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_engine(config: &Config) -> Result<HealthEngine> {
    let producer = Arc::new(ScriptProducer::new(config.producer.command.clone()));
    let tickets = Arc::new(LogTicketSink);
    HealthEngine::new(config.clone(), producer, tickets).context("Failed to start health engine")
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Daemon => handle_daemon_command(config).await,
        Commands::Ingest {
            task,
            outcome,
            accuracy,
            duration_ms,
            note,
        } => handle_ingest_command(task, outcome, *accuracy, *duration_ms, note.clone(), config).await,
        Commands::Status { task } => handle_status_command(task, config),
        Commands::Windows => handle_windows_command(config),
        Commands::Experience { task, query } => handle_experience_command(task, query, config),
    }
}

async fn handle_daemon_command(config: &Config) -> Result<()> {
    info!("Starting control loop daemon");
    if config.producer.command.is_none() {
        println!(
            "{}",
            "No producer command configured; triggers will stay queued".yellow()
        );
    }
    println!(
        "{} tick interval {}ms, data dir {}",
        "Running control loop:".cyan(),
        config.daemon.tick_interval_ms,
        config.storage.data_dir.display()
    );

    let engine = build_engine(config)?;
    engine.run().await.context("Control loop failed")
}

async fn handle_ingest_command(
    task: &str,
    outcome: &str,
    accuracy: f64,
    duration_ms: u64,
    note: Option<String>,
    config: &Config,
) -> Result<()> {
    let task_id = TaskId::parse(task)?;
    let outcome = Outcome::parse(outcome)
        .ok_or_else(|| VigilError::InvalidState(format!("unknown outcome: {}", outcome)))?;

    let engine = build_engine(config)?;
    let memory_id = engine
        .record_described(task_id, outcome, accuracy, duration_ms, note)
        .await
        .context("Failed to record execution")?;

    println!("{} {}", "Recorded:".green(), memory_id);
    Ok(())
}

fn handle_status_command(task: &str, config: &Config) -> Result<()> {
    let task_id = TaskId::parse(task)?;
    let store = StateStore::open(&config.storage.data_dir)?;

    println!("{} {}", "Status for:".green(), task_id);

    match store.get_metrics(&task_id)? {
        Some(m) => {
            println!(
                "  metrics: avg {:.3}, worst {:.3}, gap {:.3} over {} samples",
                m.avg_accuracy, m.worst_case_accuracy, m.stability_gap, m.sample_count
            );
        }
        None => println!("  metrics: {}", "none recorded".yellow()),
    }

    if let Some(entry) = store.get_queue_entry(&task_id)? {
        println!(
            "  queued: {} flags, gap {:.3} at cycle {}",
            entry.flagged_count, entry.stability_gap, entry.last_flagged_cycle
        );
    }

    if let Some(window) = store.open_window(&task_id)? {
        println!(
            "  window: v{} {} ({}/{} executions)",
            window.version_number,
            window.status.as_str(),
            window.executions_seen,
            window.target_count
        );
    }

    for version in store.list_versions(&task_id)? {
        println!(
            "  v{}: {} - {}",
            version.version_number,
            version.status.as_str(),
            version.change_summary
        );
    }

    Ok(())
}

fn handle_windows_command(config: &Config) -> Result<()> {
    let store = StateStore::open(&config.storage.data_dir)?;
    let windows = store.list_open_windows()?;

    if windows.is_empty() {
        println!("{}", "No open evaluation windows".cyan());
        return Ok(());
    }

    println!("{}", "Open evaluation windows:".cyan());
    for window in windows {
        println!(
            "  {} v{}: {} ({}/{} executions)",
            window.task_id,
            window.version_number,
            window.status.as_str(),
            window.executions_seen,
            window.target_count
        );
    }
    Ok(())
}

fn handle_experience_command(task: &str, query: &str, config: &Config) -> Result<()> {
    let task_id = TaskId::parse(task)?;
    let store = StateStore::open(&config.storage.data_dir)?;
    let library = ExperienceLibrary::new(&config.experience);

    let entries = library.retrieve(&task_id, query, &store)?;
    if entries.is_empty() {
        println!("{}", "No matching experience".yellow());
        return Ok(());
    }

    for entry in entries {
        println!("{} {}", "Entry:".green(), entry.context_hash);
        println!("  {}", entry.description);
        for decision in &entry.key_decisions {
            println!("  - {}", decision);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
