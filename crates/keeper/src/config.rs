use anyhow::{Context, Result};
use brandmark_core::CacheConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "brandmark.toml";
pub const METADATA_FILE: &str = "logo.toml";

/// `BRANDMARK_HOME`, then `BRANDMARK_CONFIG_DIR`, then the platform config dir.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("BRANDMARK_HOME") {
        return Ok(PathBuf::from(home));
    }
    if let Ok(custom_path) = std::env::var("BRANDMARK_CONFIG_DIR") {
        return Ok(PathBuf::from(custom_path));
    }
    Ok(dirs::config_dir()
        .context("Could not find config directory")?
        .join("brandmark"))
}

/// Load `brandmark.toml` from the resolved config dir, then apply environment overrides.
pub fn load() -> Result<CacheConfig> {
    let dir = config_dir()?;
    let config = load_from(&dir)?;
    Ok(apply_overrides(config, |key| std::env::var(key).ok()))
}

/// Reads `<dir>/brandmark.toml` if present; defaults otherwise. The metadata
/// path, when not configured, lands in the same directory.
pub fn load_from(dir: &Path) -> Result<CacheConfig> {
    let path = dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str::<CacheConfig>(&content)
            .with_context(|| format!("parsing {}", path.display()))?
    } else {
        CacheConfig::default()
    };

    if config.metadata_path.is_none() {
        config.metadata_path = Some(dir.join(METADATA_FILE));
    }
    Ok(config)
}

pub fn apply_overrides<F>(mut config: CacheConfig, lookup: F) -> CacheConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("BRANDMARK_CONFIG_URL") {
        config.config_url = url;
    }
    if let Some(url) = lookup("BRANDMARK_ASSET_URL") {
        config.asset_base_url = url;
    }
    if let Some(ms) = lookup("BRANDMARK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.request_timeout_ms = ms;
    }
    config
}

/// Where the metadata store lives for `config`.
pub fn metadata_path(config: &CacheConfig) -> Result<PathBuf> {
    match &config.metadata_path {
        Some(path) => Ok(path.clone()),
        None => Ok(config_dir()?.join(METADATA_FILE)),
    }
}
