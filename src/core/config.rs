//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::network::get_user_agent;
use crate::utils::validation::validate_endpoint;

/// Environment variable that overrides the persisted backend endpoint
pub const ENDPOINT_ENV_VAR: &str = "MEDIA_ORCHESTRATOR_ENDPOINT";

/// Endpoint used when nothing has been configured yet
pub const DEFAULT_ENDPOINT: &str = "http://192.168.1.100:8000";

/// Main application configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub history: HistoryConfig,
    pub advanced: AdvancedConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    pub probe_timeout_seconds: u64,
    pub discovery_timeout_seconds: u64,
    pub user_agent: String,
}

/// Recent downloads and completion ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub ledger_enabled: bool,
    /// Overrides the ledger location inside the data directory
    pub ledger_file: Option<String>,
}

/// Advanced configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub log_level: String, // "error", "warn", "info", "debug", "trace"
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            history: HistoryConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            probe_timeout_seconds: 5,
            discovery_timeout_seconds: 60,
            user_agent: get_user_agent(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            ledger_enabled: true,
            ledger_file: None,
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_seconds)
    }
}

impl AppConfig {
    /// Load configuration from the platform config dir, creating defaults if missing.
    /// The endpoint environment override is applied afterwards.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an explicit path, creating defaults if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: AppConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Save configuration to the platform config dir
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = self.export()?;

        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::debug!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = Self::project_dirs()?;
        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Get the application data directory
    pub fn get_data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Where completed downloads are recorded
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.history.ledger_file {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::get_data_dir()?.join("completed.jsonl")),
        }
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "mediaorchestrator", "orchestrator")
            .with_context(|| "Failed to get project directories")
    }

    /// Replace the endpoint from `MEDIA_ORCHESTRATOR_ENDPOINT` when set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV_VAR) {
            if !endpoint.trim().is_empty() {
                tracing::info!("Using backend endpoint from {}", ENDPOINT_ENV_VAR);
                self.backend.endpoint = endpoint.trim().to_string();
            }
        }
    }

    /// Export configuration as JSON string
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Failed to export configuration")
    }

    /// Parse and validate configuration from a JSON string
    pub fn import(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).with_context(|| "Failed to parse imported configuration")?;

        config
            .validate()
            .with_context(|| "Imported configuration is invalid")?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.backend.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid backend endpoint: {}", e))?;

        if self.backend.probe_timeout_seconds == 0 || self.backend.probe_timeout_seconds > 30 {
            anyhow::bail!("Probe timeout should be between 1 and 30 seconds");
        }

        if self.backend.discovery_timeout_seconds < self.backend.probe_timeout_seconds
            || self.backend.discovery_timeout_seconds > 600
        {
            anyhow::bail!("Discovery timeout should be between the probe timeout and 600 seconds");
        }

        if self.history.capacity == 0 || self.history.capacity > 100 {
            anyhow::bail!("History capacity should be between 1 and 100");
        }

        if !["error", "warn", "info", "debug", "trace"].contains(&self.advanced.log_level.as_str())
        {
            anyhow::bail!(
                "Invalid log level: must be 'error', 'warn', 'info', 'debug', or 'trace'"
            );
        }

        Ok(())
    }
}
