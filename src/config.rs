//! Configuration for elohim-scorm

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::commit::PipelineConfig;
use crate::error::ScormError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elohim-scorm")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for session snapshots
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP port for the RTE host and import endpoint
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Keep sessions in memory only (nothing survives a restart)
    #[serde(default)]
    pub memory_persistence: bool,

    /// Largest accepted package upload in bytes
    #[serde(default = "default_max_package_bytes")]
    pub max_package_bytes: usize,

    /// Largest total size a package may decompress to
    #[serde(default = "default_max_extracted_bytes")]
    pub max_extracted_bytes: u64,

    /// Commit pipeline retry and queue settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_http_port() -> u16 {
    8091
}

fn default_max_package_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_max_extracted_bytes() -> u64 {
    crate::package::DEFAULT_MAX_EXTRACTED_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            memory_persistence: false,
            max_package_bytes: default_max_package_bytes(),
            max_extracted_bytes: default_max_extracted_bytes(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScormError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ScormError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ScormError> {
        let content = toml::to_string_pretty(self).map_err(|e| ScormError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get session database path
    pub fn sessions_db_path(&self) -> PathBuf {
        self.storage_dir.join("sessions.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
