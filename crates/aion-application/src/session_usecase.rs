//! Session use case implementation.
//!
//! `SessionUseCase` turns user actions (new tab, duplicate, kill, dismiss,
//! typing, resizing) into registry mutations plus the matching PTY commands.

use aion_core::backend::{PtyBackend, SpawnRequest};
use aion_core::config::{ShellConfig, TerminalConfig};
use aion_core::error::Result;
use aion_core::session::Session;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::session_store::SessionStore;

/// Use case for the session lifecycle.
///
/// # Responsibilities
///
/// - Creating and duplicating sessions and spawning their processes
/// - Killing and dismissing sessions
/// - Forwarding input and resizes to live sessions only
pub struct SessionUseCase {
    store: SessionStore,
    pty: Arc<dyn PtyBackend>,
    terminal: TerminalConfig,
    shell: ShellConfig,
}

impl SessionUseCase {
    pub fn new(
        store: SessionStore,
        pty: Arc<dyn PtyBackend>,
        terminal: TerminalConfig,
        shell: ShellConfig,
    ) -> Self {
        Self {
            store,
            pty,
            terminal,
            shell,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// First-run bootstrap: creates and spawns one session if there is none.
    pub async fn bootstrap(&self, cwd: impl Into<String>) -> Option<Session> {
        if !self.store.is_empty().await {
            return None;
        }
        info!("[SessionUseCase] Bootstrapping first session");
        Some(self.create_session(cwd).await)
    }

    /// Creates a session with the configured shell, activates it and spawns it.
    pub async fn create_session(&self, cwd: impl Into<String>) -> Session {
        let session = self.store.create(self.shell.resolve(), cwd).await;
        self.store.set_active(&session.id).await;
        self.spawn(&session).await;
        session
    }

    /// Duplicates `session_id` into a new active session and spawns it.
    ///
    /// Returns `None` if the source no longer exists.
    pub async fn duplicate_session(&self, session_id: &str) -> Option<Session> {
        let Some(session) = self.store.duplicate(session_id).await else {
            debug!("[SessionUseCase] Cannot duplicate missing session {}", session_id);
            return None;
        };
        self.spawn(&session).await;
        Some(session)
    }

    async fn spawn(&self, session: &Session) {
        let request = SpawnRequest {
            session_id: session.id.clone(),
            shell: Some(session.shell),
            cwd: Some(session.cwd.clone()),
            env: self.shell.merged_env(&session.env),
            cols: self.terminal.default_cols,
            rows: self.terminal.default_rows,
        };

        match self.pty.spawn(request).await {
            Ok(()) => {
                self.store.mark_running(&session.id).await;
                debug!("[SessionUseCase] Spawned {} ({})", session.id, session.shell);
            }
            Err(e) => {
                error!("[SessionUseCase] Failed to spawn {}: {}", session.id, e);
                self.store.mark_killed(&session.id).await;
            }
        }
    }

    /// Kills the process; the session ends up terminated even if the backend
    /// call fails. Killing a terminated session changes nothing.
    pub async fn kill_session(&self, session_id: &str) {
        let Some(session) = self.store.get(session_id).await else {
            return;
        };
        if session.is_terminated() {
            return;
        }
        if let Err(e) = self.pty.kill(session_id).await {
            warn!("[SessionUseCase] Kill failed for {}: {}", session_id, e);
        }
        self.store.mark_killed(session_id).await;
    }

    /// Removes a terminated session. Live sessions are left alone.
    pub async fn dismiss_session(&self, session_id: &str) -> bool {
        let removed = self.store.remove(session_id).await;
        if !removed {
            debug!("[SessionUseCase] Session {} not dismissed", session_id);
        }
        removed
    }

    pub async fn write_input(&self, session_id: &str, text: &str) -> Result<()> {
        if !self.store.is_live(session_id).await {
            debug!("[SessionUseCase] Dropping input for {}", session_id);
            return Ok(());
        }
        self.pty.write(session_id, text.as_bytes()).await
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        if !self.store.is_live(session_id).await {
            return Ok(());
        }
        self.pty.resize(session_id, cols, rows).await
    }
}
