//! YAML configuration I/O
//!
//! Works with any serializable configuration type. A missing or malformed file
//! falls back to defaults; [`load_config_strict`] surfaces the error instead,
//! for paths the user named explicitly.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file, falling back to `T::default()`
///
/// ```ignore
/// let config: DaemonConfig = load_config(Path::new("config.yaml"));
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("[CONFIG] {:?} not found, using defaults", path);
        return T::default();
    }

    match load_config_strict(path) {
        Ok(config) => {
            log::info!("[CONFIG] Loaded {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("[CONFIG] {:#}, using defaults", e);
            T::default()
        }
    }
}

/// Load configuration from a YAML file that must exist and parse
pub fn load_config_strict<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;

    // An empty file is a valid "all defaults" document for #[serde(default)] types
    let contents = if contents.trim().is_empty() { "{}" } else { &contents };

    serde_yaml::from_str(contents).with_context(|| format!("Failed to parse config file {:?}", path))
}

/// Save configuration to a YAML file
///
/// Creates parent directories if needed. The file is written next to its final
/// location and renamed into place, so readers never see a half-written file.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;

    log::info!("[CONFIG] Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RouterConfig;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: RouterConfig = load_config(Path::new("/nonexistent/vroute/config.yaml"));
        assert_eq!(config, RouterConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = RouterConfig::default()
            .with_channels(1)
            .with_buffer_latency_ms(80);
        save_config(&config, &path).unwrap();

        let loaded: RouterConfig = load_config(&path);
        assert_eq!(loaded, config);
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn test_malformed_file_falls_back_but_strict_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "channels: [not, a, number]\n").unwrap();

        let config: RouterConfig = load_config(&path);
        assert_eq!(config, RouterConfig::default());
        assert!(load_config_strict::<RouterConfig>(&path).is_err());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "\n").unwrap();

        let config: RouterConfig = load_config_strict(&path).unwrap();
        assert_eq!(config, RouterConfig::default());
    }
}
