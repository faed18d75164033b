//! Unified path management for Aion files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/aion/              # Config directory
//! └── config.toml              # Application configuration
//!
//! ~/.local/share/aion/         # Data directory
//! └── logs/                    # Application logs
//!     └── aion.log.YYYY-MM-DD
//! ```

use aion_core::error::{AionError, Result};
use std::path::PathBuf;

const APP_DIR: &str = "aion";

pub struct AionPaths;

impl AionPaths {
    /// Platform config directory for Aion (e.g. `~/.config/aion/`).
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| AionError::config("Cannot find config directory"))
    }

    /// Platform data directory for Aion (e.g. `~/.local/share/aion/`).
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| AionError::config("Cannot find data directory"))
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("logs"))
    }
}
