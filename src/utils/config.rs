use crate::dht::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address of the DHT service daemon, host:port.
    pub service_addr: String,

    /// How often the receiver polls the peer's subkey, in milliseconds.
    pub poll_interval_ms: u64,

    /// Retry policy for transient read/write failures.
    pub retry: RetryPolicy,

    /// Data directory holding the keyring.
    pub data_dir: PathBuf,

    /// Default log level.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_addr: "127.0.0.1:5959".to_string(),
            poll_interval_ms: 500,
            retry: RetryPolicy::default(),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults when
    /// the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let mut file = File::open(path)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }

    /// Ensures the data directory exists.
    pub fn ensure_data_dir(&self) -> Result<(), ConfigError> {
        create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Where the keyring database lives.
    pub fn keyring_path(&self) -> PathBuf {
        self.data_dir.join("keyring")
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}
