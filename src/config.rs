//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Environment variable overriding the data directory
pub const HOME_OVERRIDE_VAR: &str = "RODDER_HOME";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding settings and the control socket
    pub data_dir: PathBuf,

    /// Persisted key bindings
    pub settings_path: PathBuf,

    /// Path to the Unix domain socket for the control channel
    pub socket_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(HOME_OVERRIDE_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(home).join("Rodder")
            }
        };

        Ok(Self::in_dir(data_dir))
    }

    /// Configuration rooted at `data_dir`
    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join("settings.json"),
            socket_path: data_dir.join("rodder.sock"),
            data_dir,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
