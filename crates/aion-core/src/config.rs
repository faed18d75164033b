use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::session::{MAX_OUTPUT_CHUNKS, ShellKind};

/// Root of `config.toml`. Every section and field is optional.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AionConfig {
    pub terminal: TerminalConfig,
    pub workspace: WorkspaceConfig,
    pub shell: ShellConfig,
    pub usage: UsageConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Chunks kept per session output log
    pub output_cap: usize,
    pub resize_debounce_ms: u64,
    /// Geometries narrower or shorter than this are ignored
    pub min_surface_px: u32,
    pub default_cols: u16,
    pub default_rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            output_cap: MAX_OUTPUT_CHUNKS,
            resize_debounce_ms: 50,
            min_surface_px: 8,
            default_cols: 120,
            default_rows: 32,
        }
    }
}

impl TerminalConfig {
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub refresh_debounce_ms: u64,
    /// Commit history length fetched per refresh
    pub log_limit: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: 200,
            log_limit: 100,
        }
    }
}

impl WorkspaceConfig {
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UsageConfig {
    /// Coalescing window for `token:captured` notifications
    pub refresh_debounce_ms: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: 100,
        }
    }
}

impl UsageConfig {
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    pub default_shell: ShellKind,
    pub windows_shell: ShellKind,
    /// Merged under each session's own env on spawn
    pub default_env: HashMap<String, String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_shell: ShellKind::Zsh,
            windows_shell: ShellKind::Pwsh,
            default_env: HashMap::new(),
        }
    }
}

impl ShellConfig {
    /// Shell to launch for a new session on this platform.
    ///
    /// `custom` cannot be launched without a path, so it falls back to the
    /// platform default.
    pub fn resolve(&self) -> ShellKind {
        let configured = if cfg!(windows) {
            self.windows_shell
        } else {
            self.default_shell
        };
        match configured {
            ShellKind::Custom if cfg!(windows) => ShellKind::Pwsh,
            ShellKind::Custom => ShellKind::Zsh,
            other => other,
        }
    }

    /// Config env overlaid with the session env; the session wins.
    pub fn merged_env(&self, session_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = self.default_env.clone();
        env.extend(session_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}
