//! Configuration management for the driver process.
//!
//! Loads `driver.toml` from a config directory, the same shape as the
//! donor's `ConfigManager` (`server/src/config.rs`): a thin owner of the
//! parsed configuration that knows how to find the file and apply
//! command-line overrides on top of it.

use anyhow::{Context, Result};
use common::config::DriverConfig;
use std::path::{Path, PathBuf};
use tracing::info;

const DRIVER_CONFIG_FILE: &str = "driver.toml";

pub struct ConfigManager {
    pub config_path: PathBuf,
    pub driver_config: DriverConfig,
}

impl ConfigManager {
    /// Loads configuration from `path`. If `path` is a directory,
    /// `driver.toml` inside it is used; if it doesn't exist at all, the
    /// compiled-in defaults are used (spec §6: "all optional with
    /// defaults" — the file itself is optional too).
    pub fn load(path: &Path) -> Result<Self> {
        let config_path = if path.is_dir() {
            path.join(DRIVER_CONFIG_FILE)
        } else {
            path.to_path_buf()
        };

        let driver_config = if config_path.exists() {
            info!("Loading driver configuration from {}", config_path.display());
            DriverConfig::load_from_file(&config_path)
                .with_context(|| format!("failed to load {}", config_path.display()))?
        } else {
            info!(
                "No configuration file at {}, using defaults",
                config_path.display()
            );
            DriverConfig::default()
        };

        Ok(Self {
            config_path,
            driver_config,
        })
    }

    /// Applies a listen-address override from the command line, if given.
    pub fn apply_overrides(&mut self, listen_address: Option<String>) {
        if let Some(addr) = listen_address {
            info!("Listen address override provided via command line");
            self.driver_config.listen_address = addr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(manager.driver_config, DriverConfig::default());
    }

    #[test]
    fn cli_override_replaces_listen_address() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::load(dir.path()).unwrap();
        manager.apply_overrides(Some("0.0.0.0:9000".to_string()));
        assert_eq!(manager.driver_config.listen_address, "0.0.0.0:9000");
    }
}
