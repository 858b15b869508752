use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub thresholds: ThresholdConfig,
    pub evaluation: EvaluationConfig,
    pub experience: ExperienceConfig,
    pub producer: ProducerConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory holding execution logs and the state database
    pub data_dir: PathBuf,
    /// Retry attempts for execution log writes
    pub write_retries: u32,
    /// Base delay for the write retry backoff
    pub write_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("vigil"),
            write_retries: 3,
            write_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Stability gap above which a task is degrading
    pub degrading_gap: f64,
    /// Stability gap above which a task is critical
    pub critical_gap: f64,
    /// Sliding window size W for metrics recomputes
    pub window_size: usize,
    /// Minimum samples before gap-based triggering applies
    pub min_samples: usize,
    /// Degrading flags required before a trigger fires
    pub trigger_count: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            degrading_gap: 0.3,
            critical_gap: 0.5,
            window_size: 50,
            min_samples: 5,
            trigger_count: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Post-deploy executions observed before a decision
    pub target_count: usize,
    /// Idle time after which an evaluating window is surfaced as stalled
    pub stall_age_ms: i64,
    /// Base delay for producer retry backoff
    pub producer_backoff_ms: u64,
    /// Cap for producer retry backoff
    pub producer_backoff_max_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            target_count: 10,
            stall_age_ms: 24 * 60 * 60 * 1000,
            producer_backoff_ms: 1_000,
            producer_backoff_max_ms: 64_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceConfig {
    /// Maximum retained entries per task
    pub cap_per_task: usize,
    /// Serialized size budget per entry in bytes (~500 tokens)
    pub entry_budget_bytes: usize,
    /// Maximum entries returned per retrieval
    pub retrieval_limit: usize,
    /// Admission cutoff: duration must be within this multiple of the
    /// task's historical average
    pub duration_multiple: f64,
}

impl Default for ExperienceConfig {
    fn default() -> Self {
        Self {
            cap_per_task: 20,
            entry_budget_bytes: 2_000,
            retrieval_limit: 3,
            duration_multiple: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProducerConfig {
    /// Shell command invoked to produce candidate changes; receives the
    /// request as JSON on stdin, prints the proposal as JSON on stdout.
    /// When unset, triggers stay queued until a producer is configured.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Interval between monitoring cycles
    pub tick_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            thresholds: ThresholdConfig::default(),
            evaluation: EvaluationConfig::default(),
            experience: ExperienceConfig::default(),
            producer: ProducerConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = Config::default();
        assert_eq!(config.thresholds.degrading_gap, 0.3);
        assert_eq!(config.thresholds.critical_gap, 0.5);
        assert_eq!(config.thresholds.window_size, 50);
        assert_eq!(config.thresholds.min_samples, 5);
        assert_eq!(config.thresholds.trigger_count, 3);
        assert_eq!(config.evaluation.target_count, 10);
        assert_eq!(config.experience.cap_per_task, 20);
        assert_eq!(config.experience.retrieval_limit, 3);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
thresholds:
  degrading_gap: 0.2
  trigger_count: 5
evaluation:
  target_count: 25
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.thresholds.degrading_gap, 0.2);
        assert_eq!(config.thresholds.trigger_count, 5);
        assert_eq!(config.evaluation.target_count, 25);
        // Untouched sections keep defaults
        assert_eq!(config.thresholds.critical_gap, 0.5);
        assert_eq!(config.experience.cap_per_task, 20);
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("vigil.yml");
        fs::write(&path, "thresholds:\n  window_size: 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.thresholds.window_size, 10);
    }

    #[test]
    fn test_load_missing_explicit_path_errors() {
        let path = PathBuf::from("/definitely/not/here.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.thresholds.window_size, config.thresholds.window_size);
        assert_eq!(parsed.evaluation.stall_age_ms, config.evaluation.stall_age_ms);
    }
}
