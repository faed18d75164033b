//! Shared handle around the [`SessionRegistry`].
//!
//! The registry is the single owner of session state; this handle is the only
//! way the async components reach it. Every mutation runs under one write lock
//! and is followed by a [`StoreEvent`] broadcast so readers can react.

use aion_core::session::{
    AgentKind, AppendOutcome, CycleDirection, OutputCursor, ReplayPlan, Session, SessionRegistry,
    SessionStatus, ShellKind,
};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

const EVENT_CAPACITY: usize = 256;

/// Change notification emitted after a store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Session list, a label, a status, an agent or an activity flag changed.
    SessionsChanged,
    /// The active pointer moved.
    ActiveChanged(Option<String>),
    /// New chunks were appended to a session's output.
    OutputChanged(String),
    /// A session's output was explicitly reset.
    OutputReset(String),
}

/// Cloneable handle to the session registry.
#[derive(Clone)]
pub struct SessionStore {
    registry: Arc<RwLock<SessionRegistry>>,
    events: broadcast::Sender<StoreEvent>,
}

impl SessionStore {
    pub fn new(output_cap: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry: Arc::new(RwLock::new(SessionRegistry::with_output_cap(output_cap))),
            events,
        }
    }

    /// Subscribes to change notifications.
    ///
    /// A lagging receiver only loses notifications, never state: it can always
    /// re-read the registry.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Runs `f` against the current registry state.
    pub async fn read<R>(&self, f: impl FnOnce(&SessionRegistry) -> R) -> R {
        let registry = self.registry.read().await;
        f(&registry)
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.read(|r| r.sessions().to_vec()).await
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.read(|r| r.get(session_id).cloned()).await
    }

    pub async fn active_id(&self) -> Option<String> {
        self.read(|r| r.active_id().map(str::to_string)).await
    }

    pub async fn has_activity(&self, session_id: &str) -> bool {
        self.read(|r| r.has_activity(session_id)).await
    }

    /// Whether input and resizes may be forwarded to this session.
    pub async fn is_live(&self, session_id: &str) -> bool {
        self.read(|r| r.get(session_id).is_some_and(|s| !s.is_terminated()))
            .await
    }

    pub async fn output(&self, session_id: &str) -> Vec<String> {
        self.read(|r| r.output(session_id).map(|log| log.to_vec()).unwrap_or_default())
            .await
    }

    /// Replay plan for a reader at `seen`, plus the cursor to remember after
    /// applying it. `None` if the session is gone.
    pub async fn plan_output(
        &self,
        session_id: &str,
        seen: Option<OutputCursor>,
    ) -> Option<(ReplayPlan, OutputCursor)> {
        self.read(|r| {
            r.output(session_id)
                .map(|log| (log.plan_from(seen), log.cursor()))
        })
        .await
    }

    pub async fn live_count(&self) -> usize {
        self.read(|r| r.live_count()).await
    }

    pub async fn terminated_count(&self) -> usize {
        self.read(|r| r.terminated_count()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.read(|r| r.is_empty()).await
    }

    // ============================================================================
    // Mutations
    // ============================================================================

    /// Applies `f` under the write lock and broadcasts `SessionsChanged` plus
    /// `ActiveChanged` if the active pointer moved.
    async fn mutate<R>(&self, f: impl FnOnce(&mut SessionRegistry) -> R) -> R {
        let (result, active_before, active_after) = {
            let mut registry = self.registry.write().await;
            let before = registry.active_id().map(str::to_string);
            let result = f(&mut registry);
            let after = registry.active_id().map(str::to_string);
            (result, before, after)
        };

        self.emit(StoreEvent::SessionsChanged);
        if active_before != active_after {
            self.emit(StoreEvent::ActiveChanged(active_after));
        }
        result
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub async fn create(&self, shell: ShellKind, cwd: impl Into<String>) -> Session {
        let cwd = cwd.into();
        self.mutate(|r| r.create(shell, cwd)).await
    }

    pub async fn duplicate(&self, session_id: &str) -> Option<Session> {
        self.mutate(|r| r.duplicate(session_id)).await
    }

    pub async fn set_active(&self, session_id: &str) -> bool {
        self.mutate(|r| r.set_active(session_id)).await
    }

    pub async fn rename(&self, session_id: &str, label: impl Into<String>) -> bool {
        let label = label.into();
        self.mutate(|r| r.rename(session_id, label)).await
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.mutate(|r| r.remove(session_id)).await
    }

    pub async fn reorder(&self, from: usize, to: usize) -> bool {
        self.mutate(|r| r.reorder(from, to)).await
    }

    pub async fn set_status(&self, session_id: &str, status: SessionStatus) -> bool {
        self.mutate(|r| r.set_status(session_id, status)).await
    }

    pub async fn mark_running(&self, session_id: &str) -> bool {
        self.mutate(|r| r.mark_running(session_id)).await
    }

    pub async fn mark_killed(&self, session_id: &str) -> bool {
        self.mutate(|r| r.mark_killed(session_id)).await
    }

    pub async fn set_agent(&self, session_id: &str, agent: AgentKind) -> bool {
        self.mutate(|r| r.set_agent(session_id, agent)).await
    }

    pub async fn set_activity(&self, session_id: &str, active: bool) -> bool {
        self.mutate(|r| r.set_activity(session_id, active)).await
    }

    pub async fn acknowledge(&self, session_id: &str) -> bool {
        self.mutate(|r| r.acknowledge(session_id)).await
    }

    pub async fn cycle_active(&self, direction: CycleDirection) -> Option<String> {
        self.mutate(|r| r.cycle_active(direction)).await
    }

    /// Appends one decoded chunk. Unknown sessions are ignored.
    pub async fn append_output(&self, session_id: &str, chunk: impl Into<String>) -> AppendOutcome {
        let chunk = chunk.into();
        let outcome = {
            let mut registry = self.registry.write().await;
            registry.append_output(session_id, chunk)
        };

        if outcome.appended {
            self.emit(StoreEvent::OutputChanged(session_id.to_string()));
        }
        if outcome.became_running || outcome.raised_activity {
            self.emit(StoreEvent::SessionsChanged);
        }
        outcome
    }

    pub async fn clear_output(&self, session_id: &str) -> bool {
        let cleared = {
            let mut registry = self.registry.write().await;
            registry.clear_output(session_id)
        };
        if cleared {
            self.emit(StoreEvent::OutputReset(session_id.to_string()));
        }
        cleared
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(aion_core::session::MAX_OUTPUT_CHUNKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_activity_scenario() {
        let store = SessionStore::default();
        let a = store.create(ShellKind::Zsh, "/repo").await;
        assert_eq!(a.status, SessionStatus::Idle);

        store.append_output(&a.id, "$ ").await;
        assert_eq!(store.get(&a.id).await.unwrap().status, SessionStatus::Running);
        assert!(!store.has_activity(&a.id).await);

        let b = store.create(ShellKind::Zsh, "/repo").await;
        store.set_active(&b.id).await;
        store.append_output(&a.id, "build finished\r\n").await;
        assert!(store.has_activity(&a.id).await);

        store.set_active(&a.id).await;
        assert!(!store.has_activity(&a.id).await);
    }

    #[tokio::test]
    async fn test_mutations_broadcast_events() {
        let store = SessionStore::default();
        let mut events = store.subscribe();

        let a = store.create(ShellKind::Bash, "/repo").await;
        assert_eq!(events.recv().await.unwrap(), StoreEvent::SessionsChanged);
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::ActiveChanged(Some(a.id.clone()))
        );

        store.append_output(&a.id, "x").await;
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::OutputChanged(a.id.clone())
        );
        // Idle -> running is a session change as well.
        assert_eq!(events.recv().await.unwrap(), StoreEvent::SessionsChanged);

        store.clear_output(&a.id).await;
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::OutputReset(a.id.clone())
        );
    }

    #[tokio::test]
    async fn test_unknown_session_output_emits_nothing() {
        let store = SessionStore::default();
        let mut events = store.subscribe();

        let outcome = store.append_output("ghost", "data").await;
        assert!(!outcome.appended);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_plan_output_tracks_cursor() {
        let store = SessionStore::new(4);
        let a = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "one").await;

        let (plan, cursor) = store.plan_output(&a.id, None).await.unwrap();
        assert_eq!(plan, ReplayPlan::Replace(vec!["one".to_string()]));

        store.append_output(&a.id, "two").await;
        let (plan, _) = store.plan_output(&a.id, Some(cursor)).await.unwrap();
        assert_eq!(plan, ReplayPlan::Append(vec!["two".to_string()]));

        assert!(store.plan_output("ghost", None).await.is_none());
    }
}
