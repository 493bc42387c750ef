//! Configuration management for dockman

mod dockman;
mod machine;
pub mod serde_utils;

pub use dockman::{DockmanConfig, UpdaterConfig, DEFAULT_LOCAL_HOST};
pub use machine::MachineProfile;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dockman")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = load_config::<DockmanConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DockmanConfig::default();
        config
            .machines
            .insert("edge-1".to_string(), MachineProfile::new("10.0.0.5:22", "deploy"));
        config.updater.sidecar_url = "http://updater:8869".to_string();
        save_config(&path, &config).unwrap();

        let loaded: DockmanConfig = load_config(&path).unwrap();
        assert_eq!(loaded.machines.len(), 1);
        assert_eq!(loaded.machines["edge-1"].address, "10.0.0.5:22");
        assert_eq!(loaded.updater.sidecar_url, "http://updater:8869");
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "machines = 3").unwrap();
        let err = load_config::<DockmanConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
