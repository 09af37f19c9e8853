//! Configuration file and operator preferences for blegw

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blegw_gateway::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for the CLI tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Account user name (e-mail)
    pub user: Option<String>,
    /// Gateway to use without asking
    pub gateway: Option<String>,
    /// CSV file receiving card reads
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("blegw"))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

/// Answers remembered from the last run. The password is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub user: Option<String>,
    pub period_secs: Option<u32>,
    pub data_file: Option<String>,
}

impl Preferences {
    pub fn path() -> Result<PathBuf> {
        Ok(Config::config_dir()?.join("preferences.toml"))
    }

    /// Read preferences, falling back to empty ones if the file is missing or broken
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        toml::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable preferences");
            Self::default()
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content = toml::to_string(self).context("Failed to serialize preferences")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write preferences: {}", path.display()))
    }
}
