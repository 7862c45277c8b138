//! Application configuration

use anyhow::{Context, Result};
use fabric_monitor_sources::SimulationConfig;
use fabric_monitor_types::{EngineConfig, GroupSource, PortSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current version of the config format
pub const CONFIG_VERSION: u32 = 1;

/// Application-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of the config format
    pub version: u32,
    /// Scheduler settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Shape of the simulated fabric
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Sources watched at startup
    #[serde(default)]
    pub watch: WatchConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::load_from_path(&config_path)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_path()?)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "github.fabric_monitor", "fabric-monitor")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load configuration from a specific file path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a specific file path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            engine: EngineConfig::default(),
            simulation: SimulationConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Sources to watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WatchConfig {
    #[serde(default)]
    pub groups: Vec<GroupSource>,
    #[serde(default)]
    pub ports: Vec<PortSource>,
}
