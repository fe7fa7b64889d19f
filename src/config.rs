use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Knowledge-graph store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Path of the JSON graph document
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Pretty-print the document on save
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            file_path: default_file_path(),
            log_level: default_log_level(),
            pretty: default_pretty(),
        }
    }
}

fn default_file_path() -> PathBuf {
    PathBuf::from("memory.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pretty() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in KGMEM_CONFIG environment variable (must exist)
    /// 2. ./config.toml in current directory (defaults if absent)
    ///
    /// MEMORY_FILE_PATH overrides `memory.file_path` either way.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let mut config = match std::env::var("KGMEM_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let default_path = Path::new("config.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        if let Ok(path) = std::env::var("MEMORY_FILE_PATH") {
            config.memory.file_path = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.memory.file_path.as_os_str().is_empty() {
            anyhow::bail!("memory.file_path must not be empty");
        }
        if self.memory.file_path.is_dir() {
            anyhow::bail!(
                "memory.file_path must be a file, not a directory: {}",
                self.memory.file_path.display()
            );
        }
        Ok(())
    }

    /// Get graph document path
    pub fn file_path(&self) -> &Path {
        &self.memory.file_path
    }
}
