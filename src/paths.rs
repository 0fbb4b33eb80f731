//! Path resolution for flownet
//!
//! # Environment Variables
//!
//! - `FLOWNET_CONFIG_DIR` - Override config directory (holds `system.toml`)
//! - `FLOWNET_STATE_DIR` - Override state directory (holds run snapshots)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `FLOWNET_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/flownet` (if set)
//! 3. `~/.config/flownet`
//!
//! For state_dir():
//! 1. `FLOWNET_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/flownet` (if set)
//! 3. `~/.local/state/flownet`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_DIR: &str = "FLOWNET_CONFIG_DIR";

pub const ENV_STATE_DIR: &str = "FLOWNET_STATE_DIR";

/// Name of the system description inside the config directory
pub const SYSTEM_FILE: &str = "system.toml";

pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("flownet");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("flownet"))
}

pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("flownet");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("flownet"))
}

/// The system description to load: the given path, or the default one
pub fn system_file(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(SYSTEM_FILE)),
    }
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
