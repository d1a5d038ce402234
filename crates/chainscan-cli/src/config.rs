//! Configuration loading

use anyhow::Result;
use chainscan_discovery::ScannerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

/// Where the server topologies are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Hardware server topology file
    #[serde(default = "default_hw_server")]
    pub hw_server: PathBuf,
    /// Chipscope server topology file (optional)
    #[serde(default)]
    pub cs_server: Option<PathBuf>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            hw_server: default_hw_server(),
            cs_server: None,
        }
    }
}

fn default_hw_server() -> PathBuf {
    PathBuf::from("hw_server.json")
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
