//! Session registry: the set of sessions, the active pointer, and the
//! per-session output logs and activity flags derived from them.
//!
//! Pure state, no I/O. Every mutation keeps the derived maps in lockstep with
//! the session list, and operations on unknown ids are no-ops.

use super::agent::{apply_agent, default_label};
use super::model::{AgentKind, Session, SessionStatus, ShellKind};
use super::output::{MAX_OUTPUT_CHUNKS, OutputLog};
use std::collections::HashMap;

/// Direction used when cycling through live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    Next,
    Previous,
}

/// What an output append changed, so callers can decide what to notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// The session existed and the chunk was stored.
    pub appended: bool,
    /// Status moved from idle to running.
    pub became_running: bool,
    /// The activity flag went from false to true.
    pub raised_activity: bool,
}

/// Owns every session known to the client.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    /// Sessions in display order
    sessions: Vec<Session>,
    /// Currently active session, always present in `sessions` when set
    active_id: Option<String>,
    output: HashMap<String, OutputLog>,
    activity: HashMap<String, bool>,
    output_cap: usize,
}

impl SessionRegistry {
    /// Creates an empty registry with the default output cap.
    pub fn new() -> Self {
        Self::with_output_cap(MAX_OUTPUT_CHUNKS)
    }

    /// Creates an empty registry whose logs keep at most `output_cap` chunks.
    pub fn with_output_cap(output_cap: usize) -> Self {
        Self {
            sessions: Vec::new(),
            active_id: None,
            output: HashMap::new(),
            activity: HashMap::new(),
            output_cap,
        }
    }

    // ============================================================================
    // Queries
    // ============================================================================

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active_id.as_deref() == Some(session_id)
    }

    pub fn output(&self, session_id: &str) -> Option<&OutputLog> {
        self.output.get(session_id)
    }

    pub fn has_activity(&self, session_id: &str) -> bool {
        self.activity.get(session_id).copied().unwrap_or(false)
    }

    /// Number of sessions that have not terminated.
    pub fn live_count(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_terminated()).count()
    }

    pub fn terminated_count(&self) -> usize {
        self.sessions.len() - self.live_count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Creates an idle session labelled after its ordinal position.
    ///
    /// The new session becomes active only if nothing is active yet.
    pub fn create(&mut self, shell: ShellKind, cwd: impl Into<String>) -> Session {
        let session = Session::new(default_label(self.sessions.len() + 1), shell, cwd);
        self.insert(session.clone());
        if self.active_id.is_none() {
            self.active_id = Some(session.id.clone());
        }
        session
    }

    /// Copies shell, cwd, agent and env from an existing session.
    ///
    /// Returns `None` when the source is gone. The copy always becomes active.
    pub fn duplicate(&mut self, session_id: &str) -> Option<Session> {
        let base = self.get(session_id)?;

        let mut session = Session::new(format!("{} Copy", base.label), base.shell, base.cwd.clone());
        session.agent = base.agent;
        session.env = base.env.clone();

        self.insert(session.clone());
        self.active_id = Some(session.id.clone());
        Some(session)
    }

    fn insert(&mut self, session: Session) {
        self.output
            .insert(session.id.clone(), OutputLog::with_capacity(self.output_cap));
        self.activity.insert(session.id.clone(), false);
        self.sessions.push(session);
    }

    /// Makes `session_id` active and clears its activity flag.
    ///
    /// Unknown ids are ignored. Returns `true` if the active session changed.
    pub fn set_active(&mut self, session_id: &str) -> bool {
        if !self.contains(session_id) {
            return false;
        }
        self.activity.insert(session_id.to_string(), false);
        if self.is_active(session_id) {
            return false;
        }
        self.active_id = Some(session_id.to_string());
        true
    }

    /// Updates the label only; uniqueness is not enforced.
    pub fn rename(&mut self, session_id: &str, label: impl Into<String>) -> bool {
        match self.get_mut(session_id) {
            Some(session) => {
                session.label = label.into();
                true
            }
            None => false,
        }
    }

    /// Removes a terminated session together with its output and activity.
    ///
    /// Live sessions cannot be dismissed; the call is a no-op for them. When the
    /// removed session was active, the first remaining live session becomes
    /// active, or nothing if none is left.
    pub fn remove(&mut self, session_id: &str) -> bool {
        let Some(index) = self.sessions.iter().position(|s| s.id == session_id) else {
            return false;
        };
        if !self.sessions[index].is_terminated() {
            return false;
        }

        self.sessions.remove(index);
        self.output.remove(session_id);
        self.activity.remove(session_id);

        if self.is_active(session_id) {
            self.active_id = self.first_live_id();
        }
        true
    }

    /// Moves a session within the display order.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.sessions.len() || to >= self.sessions.len() || from == to {
            return false;
        }
        let moved = self.sessions.remove(from);
        self.sessions.insert(to, moved);
        true
    }

    // ============================================================================
    // Status, agent, activity
    // ============================================================================

    pub fn set_status(&mut self, session_id: &str, status: SessionStatus) -> bool {
        match self.get_mut(session_id) {
            Some(session) if session.status != status => {
                session.status = status;
                true
            }
            _ => false,
        }
    }

    /// Spawn acknowledged or data seen: idle becomes running. A terminated
    /// session stays terminated.
    pub fn mark_running(&mut self, session_id: &str) -> bool {
        match self.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::Idle => {
                session.status = SessionStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Records a detected agent. Sticky once set; see [`apply_agent`].
    pub fn set_agent(&mut self, session_id: &str, agent: AgentKind) -> bool {
        match self.get_mut(session_id) {
            Some(session) => apply_agent(session, agent),
            None => false,
        }
    }

    pub fn set_activity(&mut self, session_id: &str, active: bool) -> bool {
        match self.activity.get_mut(session_id) {
            Some(flag) if *flag != active => {
                *flag = active;
                true
            }
            _ => false,
        }
    }

    /// User acknowledged the activity indicator without switching to it.
    pub fn acknowledge(&mut self, session_id: &str) -> bool {
        self.set_activity(session_id, false)
    }

    /// Marks a session terminated after a kill; if it was active, the next live
    /// session (if any) takes over. Repeated kills change nothing.
    pub fn mark_killed(&mut self, session_id: &str) -> bool {
        let changed = self.set_status(session_id, SessionStatus::Terminated);
        if self.is_active(session_id) {
            if let Some(next) = self.first_live_id() {
                self.set_active(&next);
            }
        }
        changed
    }

    // ============================================================================
    // Output
    // ============================================================================

    /// Appends one chunk of output for a session.
    ///
    /// Data implies the process is alive, so an idle session becomes running; a
    /// terminated session stays terminated. The activity flag is raised unless
    /// the session is the active one.
    pub fn append_output(&mut self, session_id: &str, chunk: impl Into<String>) -> AppendOutcome {
        let Some(log) = self.output.get_mut(session_id) else {
            return AppendOutcome::default();
        };
        log.append(chunk);

        let became_running = self.mark_running(session_id);

        let is_active = self.is_active(session_id);
        let raised_activity = self.set_activity(session_id, !is_active) && !is_active;

        AppendOutcome {
            appended: true,
            became_running,
            raised_activity,
        }
    }

    /// Explicit reset of a session's output.
    pub fn clear_output(&mut self, session_id: &str) -> bool {
        match self.output.get_mut(session_id) {
            Some(log) => {
                log.clear();
                true
            }
            None => false,
        }
    }

    // ============================================================================
    // Navigation
    // ============================================================================

    /// Activates the next or previous live session, wrapping around.
    ///
    /// Returns the newly active id, or `None` if there is no live session.
    pub fn cycle_active(&mut self, direction: CycleDirection) -> Option<String> {
        let candidates: Vec<&str> = self
            .sessions
            .iter()
            .filter(|s| !s.is_terminated())
            .map(|s| s.id.as_str())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let current = self
            .active_id
            .as_deref()
            .and_then(|id| candidates.iter().position(|c| *c == id));
        let len = candidates.len();
        let next = match (current, direction) {
            (None, _) => 0,
            (Some(i), CycleDirection::Next) => (i + 1) % len,
            (Some(i), CycleDirection::Previous) => (i + len - 1) % len,
        };

        let next_id = candidates[next].to_string();
        self.set_active(&next_id);
        Some(next_id)
    }

    fn first_live_id(&self) -> Option<String> {
        self.sessions
            .iter()
            .find(|s| !s.is_terminated())
            .map(|s| s.id.clone())
    }

    fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
