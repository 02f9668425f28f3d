use anyhow::{anyhow, Result};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the conversation core. Everything has a sensible default;
/// a saved file only needs the fields it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// How long after the last keystroke the typing indicator is withdrawn.
    pub typing_idle_ms: u64,
    /// Ceiling for attachment uploads, in bytes.
    pub max_attachment_bytes: usize,
    /// How many characters a directory preview keeps before truncation.
    pub preview_chars: usize,
    /// Capacity of the event channels between core and UI.
    pub channel_capacity: usize,
    /// How many times a resync retries re-establishing its channels.
    pub resync_attempts: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            typing_idle_ms: 3_000,
            max_attachment_bytes: 5 * 1024 * 1024,
            preview_chars: 80,
            channel_capacity: 100,
            resync_attempts: 3,
        }
    }
}

impl ChatConfig {
    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("parley");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

pub fn save_config(config: &ChatConfig) -> Result<()> {
    let config_path = get_config_path()?;
    let file = File::create(config_path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Configuration saved");
    Ok(())
}

pub fn load_config() -> Result<Option<ChatConfig>> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(None);
    }

    let config_path_str = config_path.display().to_string();

    let mut file = File::open(config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let config: ChatConfig = serde_json::from_str(&contents)?;
    info!("Loaded configuration from {}", config_path_str);

    Ok(Some(config))
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Point config persistence at an explicit file. Used by tests; first caller wins.
pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}
