//! Session domain model.
//!
//! A session is one terminal tab in the workbench: a shell running in a PTY
//! owned by the backend, plus the client-side metadata needed to display it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Shell flavours the backend knows how to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Zsh,
    Bash,
    Fish,
    Pwsh,
    Powershell,
    Cmd,
    /// A user-provided shell path resolved by the backend.
    Custom,
}

impl ShellKind {
    /// Identifier sent to the backend in spawn requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::Zsh => "zsh",
            ShellKind::Bash => "bash",
            ShellKind::Fish => "fish",
            ShellKind::Pwsh => "pwsh",
            ShellKind::Powershell => "powershell",
            ShellKind::Cmd => "cmd",
            ShellKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a session's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created but no data seen and no spawn acknowledged yet.
    #[default]
    Idle,
    /// The process is alive.
    Running,
    /// The process exited or was killed. Terminal state.
    Terminated,
}

impl SessionStatus {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionStatus::Terminated)
    }
}

/// Coding agents recognised from terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    ClaudeCode,
    CopilotCli,
}

impl AgentKind {
    /// Name used when an agent detection rewrites a session label.
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "Claude Code",
            AgentKind::CopilotCli => "Copilot CLI",
        }
    }
}

/// Represents one terminal session known to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID format), stable for the process lifetime
    pub id: String,
    /// Display label, either auto-generated or set by the user
    pub label: String,
    /// Shell launched for this session
    pub shell: ShellKind,
    /// Working directory the shell starts in
    pub cwd: String,
    /// Agent detected in the output, sticky once set
    #[serde(default)]
    pub agent: Option<AgentKind>,
    /// Current lifecycle status
    #[serde(default)]
    pub status: SessionStatus,
    /// Timestamp when the session was created (ISO 8601 format)
    pub created_at: String,
    /// Environment overrides applied on spawn
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Session {
    /// Creates an idle session with a fresh id.
    pub fn new(label: impl Into<String>, shell: ShellKind, cwd: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            shell,
            cwd: cwd.into(),
            agent: None,
            status: SessionStatus::Idle,
            created_at: chrono::Utc::now().to_rfc3339(),
            env: HashMap::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status.is_terminated()
    }
}
