//! Configuration service implementation.
//!
//! Loads [`AionConfig`] from `config.toml` (~/.config/aion/config.toml by
//! default) and caches it.

use crate::paths::AionPaths;
use aion_core::config::AionConfig;
use aion_core::error::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Configuration service that loads and caches the root configuration.
///
/// The file is read lazily on first access. A missing file means defaults;
/// a malformed one is reported and also falls back to defaults.
#[derive(Debug, Clone)]
pub struct ConfigService {
    /// Explicit location, or the platform default when `None`
    path: Option<PathBuf>,
    config: Arc<RwLock<Option<AionConfig>>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            path: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Service reading from a specific file instead of the platform default.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading it from disk if not cached.
    pub fn get_config(&self) -> AionConfig {
        {
            let cached = self.config.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(config) = cached.as_ref() {
                return config.clone();
            }
        }

        let loaded = match self.resolve_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!("[ConfigService] Using default configuration: {}", e);
                AionConfig::default()
            }
        };

        let mut cached = self.config.write().unwrap_or_else(PoisonError::into_inner);
        *cached = Some(loaded.clone());
        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut cached = self.config.write().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
    }

    /// Reads `path` as TOML. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<AionConfig> {
        if !path.exists() {
            debug!("[ConfigService] {} not found, using defaults", path.display());
            return Ok(AionConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        debug!("[ConfigService] Loaded {}", path.display());
        Ok(config)
    }

    fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => AionPaths::config_file(),
        }
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}
