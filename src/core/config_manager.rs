use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::core::config::UpdaterConfig;

/// Get the user data directory for updatex
/// - macOS: ~/.updatex/
/// - Windows: %APPDATA%\updatex\
/// - Linux: ~/.config/updatex/
pub fn get_user_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get home directory"))?;
        Ok(home.join(".updatex"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get AppData directory"))?;
        Ok(appdata.join("updatex"))
    }

    #[cfg(target_os = "linux")]
    {
        let config = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
        Ok(config.join("updatex"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        Err(anyhow::anyhow!("Unsupported platform"))
    }
}

/// Get the config file path in the user data directory
pub fn get_user_config_path() -> Result<PathBuf> {
    Ok(get_user_data_dir()?.join("config.json"))
}

/// Downloads cache for update artifacts
/// - explicit `cacheDir` from the config wins
/// - otherwise <user_data_dir>/Cache
pub fn get_cache_dir(config: &UpdaterConfig) -> Result<PathBuf> {
    match &config.cache_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(get_user_data_dir()?.join("Cache")),
    }
}

/// Where the feed probe agent stages fetched artifacts
pub fn get_staging_dir() -> Result<PathBuf> {
    Ok(get_user_data_dir()?.join("Staging"))
}

/// Write a default config file at `path` unless one already exists
pub fn ensure_default_config_at(path: &Path) -> Result<()> {
    if path.exists() {
        log::info!("Using existing config file: {:?}", path);
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let default_config = serde_json::to_string_pretty(&UpdaterConfig::default())
        .context("Failed to serialize default config")?;
    std::fs::write(path, default_config)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Created default config file at: {:?}", path);
    Ok(())
}

/// Initialize user config directory and config file
/// If config file doesn't exist, create it with default settings
pub fn initialize_user_config() -> Result<PathBuf> {
    let config_path = get_user_config_path()?;
    ensure_default_config_at(&config_path)?;
    Ok(config_path)
}

/// Load and normalize a config file
pub fn load_config(path: &Path) -> Result<UpdaterConfig> {
    let config_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: UpdaterConfig = serde_json::from_str(&config_content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .normalize()
        .with_context(|| format!("Invalid config file: {:?}", path))
}

/// Load config from user data directory, creating a default one first if needed
pub fn load_user_config() -> Result<UpdaterConfig> {
    let config_path = initialize_user_config()?;
    load_config(&config_path)
}
