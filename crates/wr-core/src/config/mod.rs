//! Configuration management for warren

mod coordinator;
pub mod serde_utils;

pub use coordinator::{
    CertificateConfig, CoordinatorConfig, FlagsConfig, ProxyConfig, RelayConfig, ServerConfig,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warren")
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
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let err = load_config::<CoordinatorConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(p) if p == path));
    }

    #[test]
    fn test_save_then_load_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CoordinatorConfig::default();
        config.exit_node_name = Some("edge-1".into());
        config.proxy.https_entrypoint = "secure".into();
        save_config(&path, &config).unwrap();

        let loaded: CoordinatorConfig = load_config(&path).unwrap();
        assert_eq!(loaded.exit_node_name.as_deref(), Some("edge-1"));
        assert_eq!(loaded.proxy.https_entrypoint, "secure");
        assert_eq!(loaded.certificates.monitor_interval, config.certificates.monitor_interval);
    }
}
