//! Drives a stateful terminal render surface from the session output logs.
//!
//! A [`RenderReconciler`] is either unattached or attached to one surface.
//! While attached, a driver task owns the surface and serialises everything
//! that touches it: output replay, user input, viewport geometry and renderer
//! capability changes.

use aion_core::backend::PtyBackend;
use aion_core::config::TerminalConfig;
use aion_core::error::Result;
use aion_core::session::{OutputCursor, ReplayPlan};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deadline::wait_until;
use crate::session_store::{SessionStore, StoreEvent};

/// Pixel size of the viewport hosting the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width_px: u32,
    pub height_px: u32,
}

impl Geometry {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }

    /// Collapsed or hidden viewports report tiny sizes that must not be applied.
    pub fn is_degenerate(&self, min_px: u32) -> bool {
        self.width_px < min_px || self.height_px < min_px
    }
}

/// Which renderer the surface is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderBackendKind {
    /// Baseline renderer, always available.
    #[default]
    Software,
    /// Optional higher-fidelity renderer.
    Accelerated,
}

/// A terminal widget that can be cleared, written to and fitted.
pub trait RenderSurface: Send + 'static {
    fn clear(&mut self);

    fn write(&mut self, data: &str);

    /// Fits the character grid to `geometry`, returning `(cols, rows)`.
    fn fit(&mut self, geometry: Geometry) -> (u16, u16);

    fn set_backend(&mut self, _backend: RenderBackendKind) {}
}

/// Optional accelerated renderer, negotiated after attach.
#[async_trait]
pub trait RenderAccelerator: Send + Sync {
    async fn init(&self) -> Result<()>;
}

/// Snapshot of a driver's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub session_id: Option<String>,
    pub backend: RenderBackendKind,
    /// Position in the session log the surface reflects
    pub rendered: Option<OutputCursor>,
    /// Last size sent to the backend
    pub last_resize: Option<(u16, u16)>,
    pub resizes_sent: usize,
    pub full_replays: usize,
    pub inputs_dropped: usize,
}

enum RenderCommand {
    ShowSession(Option<String>),
    Geometry(Geometry),
    Input(String),
    AcceleratorReady(Result<()>),
    AcceleratorLost,
    Stats(oneshot::Sender<RenderStats>),
}

enum ReconcilerState {
    Unattached,
    Attached(Attachment),
}

struct Attachment {
    tx: mpsc::UnboundedSender<RenderCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct RenderReconciler {
    state: ReconcilerState,
    store: SessionStore,
    pty: Arc<dyn PtyBackend>,
    config: TerminalConfig,
    accelerator: Option<Arc<dyn RenderAccelerator>>,
}

impl RenderReconciler {
    pub fn new(store: SessionStore, pty: Arc<dyn PtyBackend>, config: TerminalConfig) -> Self {
        Self {
            state: ReconcilerState::Unattached,
            store,
            pty,
            config,
            accelerator: None,
        }
    }

    /// Attempts this accelerator on every attach.
    pub fn with_accelerator(mut self, accelerator: Arc<dyn RenderAccelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, ReconcilerState::Attached(_))
    }

    /// Takes ownership of `surface` and starts driving it.
    ///
    /// An existing attachment is cancelled first.
    pub fn attach<S: RenderSurface>(&mut self, surface: S, session_id: Option<String>) {
        if let ReconcilerState::Attached(previous) = &self.state {
            debug!("[RenderReconciler] Re-attaching, cancelling previous surface");
            previous.cancel.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        if let Some(accelerator) = self.accelerator.clone() {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = accelerator.init() => result,
                };
                let _ = tx.send(RenderCommand::AcceleratorReady(result));
            });
        }

        let driver = SurfaceDriver {
            surface,
            store: self.store.clone(),
            pty: self.pty.clone(),
            config: self.config.clone(),
            session_id: None,
            backend: RenderBackendKind::Software,
            rendered: None,
            pending_geometry: None,
            last_geometry: None,
            resize_deadline: None,
            last_notified: None,
            stats: RenderStats::default(),
        };
        let events = self.store.subscribe();
        let task = tokio::spawn(driver.run(session_id, rx, events, cancel.clone()));

        info!("[RenderReconciler] Surface attached");
        self.state = ReconcilerState::Attached(Attachment { tx, cancel, task });
    }

    /// Stops driving the surface and waits for the driver to drop it.
    pub async fn detach(&mut self) {
        let state = std::mem::replace(&mut self.state, ReconcilerState::Unattached);
        if let ReconcilerState::Attached(attachment) = state {
            attachment.cancel.cancel();
            if let Err(e) = attachment.task.await {
                warn!("[RenderReconciler] Driver task ended abnormally: {}", e);
            }
            info!("[RenderReconciler] Surface detached");
        }
    }

    /// Shows another session (or none). The surface is cleared and the new
    /// session's log replayed from scratch.
    pub fn show_session(&self, session_id: Option<String>) {
        self.send(RenderCommand::ShowSession(session_id));
    }

    /// Viewport size changed.
    pub fn geometry_changed(&self, geometry: Geometry) {
        self.send(RenderCommand::Geometry(geometry));
    }

    /// Text typed into the surface.
    pub fn input(&self, data: impl Into<String>) {
        self.send(RenderCommand::Input(data.into()));
    }

    /// The accelerated renderer went away (e.g. GPU context lost).
    pub fn accelerator_lost(&self) {
        self.send(RenderCommand::AcceleratorLost);
    }

    pub async fn stats(&self) -> Option<RenderStats> {
        let (tx, rx) = oneshot::channel();
        if !self.send(RenderCommand::Stats(tx)) {
            return None;
        }
        rx.await.ok()
    }

    fn send(&self, command: RenderCommand) -> bool {
        match &self.state {
            ReconcilerState::Attached(attachment) => attachment.tx.send(command).is_ok(),
            ReconcilerState::Unattached => {
                debug!("[RenderReconciler] Ignoring command while unattached");
                false
            }
        }
    }
}

impl Drop for RenderReconciler {
    fn drop(&mut self) {
        if let ReconcilerState::Attached(attachment) = &self.state {
            attachment.cancel.cancel();
        }
    }
}

struct SurfaceDriver<S> {
    surface: S,
    store: SessionStore,
    pty: Arc<dyn PtyBackend>,
    config: TerminalConfig,
    session_id: Option<String>,
    backend: RenderBackendKind,
    rendered: Option<OutputCursor>,
    pending_geometry: Option<Geometry>,
    last_geometry: Option<Geometry>,
    resize_deadline: Option<Instant>,
    last_notified: Option<(u16, u16)>,
    stats: RenderStats,
}

/// `session_id`, if it still exists and has not terminated.
///
/// Free function: surfaces are not `Sync`, so the driver must not be borrowed
/// across this await.
async fn live_session(store: &SessionStore, session_id: Option<String>) -> Option<String> {
    let id = session_id?;
    store.is_live(&id).await.then_some(id)
}

impl<S: RenderSurface> SurfaceDriver<S> {
    async fn run(
        mut self,
        session_id: Option<String>,
        mut commands: mpsc::UnboundedReceiver<RenderCommand>,
        mut events: broadcast::Receiver<StoreEvent>,
        cancel: CancellationToken,
    ) {
        self.switch_session(session_id).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => self.handle_store_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("[RenderReconciler] Lagged {} store events, resyncing", skipped);
                        self.sync_output().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = wait_until(self.resize_deadline) => self.flush_resize().await,
            }
        }
        debug!("[RenderReconciler] Driver stopped");
    }

    async fn handle_command(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::ShowSession(session_id) => {
                if session_id != self.session_id {
                    self.switch_session(session_id).await;
                }
            }
            RenderCommand::Geometry(geometry) => self.schedule_resize(geometry),
            RenderCommand::Input(data) => self.forward_input(data).await,
            RenderCommand::AcceleratorReady(Ok(())) => {
                info!("[RenderReconciler] Accelerated renderer enabled");
                self.set_backend(RenderBackendKind::Accelerated);
            }
            RenderCommand::AcceleratorReady(Err(e)) => {
                info!(
                    "[RenderReconciler] Accelerated renderer unavailable, staying on software: {}",
                    e
                );
            }
            RenderCommand::AcceleratorLost => {
                if self.backend == RenderBackendKind::Accelerated {
                    info!("[RenderReconciler] Accelerated renderer lost, falling back to software");
                    self.set_backend(RenderBackendKind::Software);
                }
            }
            RenderCommand::Stats(reply) => {
                let _ = reply.send(self.snapshot_stats());
            }
        }
    }

    async fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::OutputChanged(id) | StoreEvent::OutputReset(id)
                if self.session_id.as_deref() == Some(id.as_str()) =>
            {
                self.sync_output().await;
            }
            // The shown session may have been removed.
            StoreEvent::SessionsChanged if self.rendered.is_some() => self.sync_output().await,
            _ => {}
        }
    }

    /// Clears the surface and replays the whole log of `session_id`.
    async fn switch_session(&mut self, session_id: Option<String>) {
        debug!("[RenderReconciler] Switching to session {:?}", session_id);
        self.session_id = session_id;
        self.rendered = None;
        self.surface.clear();

        if let Some(id) = self.session_id.clone() {
            if let Some((plan, cursor)) = self.store.plan_output(&id, None).await {
                self.apply(plan);
                self.rendered = Some(cursor);
            }
        }

        // The new session has never been told the current size.
        self.last_notified = None;
        if let Some(geometry) = self.last_geometry {
            self.schedule_resize(geometry);
        }
    }

    async fn sync_output(&mut self) {
        let Some(id) = self.session_id.clone() else {
            return;
        };
        match self.store.plan_output(&id, self.rendered).await {
            Some((plan, cursor)) => {
                self.apply(plan);
                self.rendered = Some(cursor);
            }
            None => {
                if self.rendered.take().is_some() {
                    debug!("[RenderReconciler] Session {} is gone, clearing surface", id);
                    self.surface.clear();
                }
            }
        }
    }

    fn apply(&mut self, plan: ReplayPlan) {
        match plan {
            ReplayPlan::Nothing => {}
            ReplayPlan::Append(chunks) => {
                for chunk in &chunks {
                    self.surface.write(chunk);
                }
            }
            ReplayPlan::Replace(chunks) => {
                self.stats.full_replays += 1;
                self.surface.clear();
                for chunk in &chunks {
                    self.surface.write(chunk);
                }
            }
        }
    }

    fn schedule_resize(&mut self, geometry: Geometry) {
        if geometry.is_degenerate(self.config.min_surface_px) {
            debug!("[RenderReconciler] Ignoring degenerate geometry {:?}", geometry);
            return;
        }
        self.pending_geometry = Some(geometry);
        if self.resize_deadline.is_none() {
            self.resize_deadline = Some(Instant::now() + self.config.resize_debounce());
        }
    }

    async fn flush_resize(&mut self) {
        self.resize_deadline = None;
        let Some(geometry) = self.pending_geometry.take() else {
            return;
        };
        self.last_geometry = Some(geometry);
        let size = self.surface.fit(geometry);

        if self.last_notified == Some(size) {
            return;
        }
        let Some(id) = live_session(&self.store, self.session_id.clone()).await else {
            return;
        };

        match self.pty.resize(&id, size.0, size.1).await {
            Ok(()) => {
                debug!("[RenderReconciler] Resized {} to {}x{}", id, size.0, size.1);
                self.last_notified = Some(size);
                self.stats.resizes_sent += 1;
            }
            Err(e) => warn!("[RenderReconciler] Resize failed for {}: {}", id, e),
        }
    }

    async fn forward_input(&mut self, data: String) {
        let Some(id) = live_session(&self.store, self.session_id.clone()).await else {
            self.stats.inputs_dropped += 1;
            debug!("[RenderReconciler] Dropping input with no live session");
            return;
        };
        if let Err(e) = self.pty.write(&id, data.as_bytes()).await {
            warn!("[RenderReconciler] Write failed for {}: {}", id, e);
        }
    }

    fn set_backend(&mut self, backend: RenderBackendKind) {
        self.backend = backend;
        self.surface.set_backend(backend);
    }

    fn snapshot_stats(&self) -> RenderStats {
        RenderStats {
            session_id: self.session_id.clone(),
            backend: self.backend,
            rendered: self.rendered,
            last_resize: self.last_notified,
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockAccelerator, MockPty, PtyCall, RecordingSurface, settle};
    use aion_core::session::{SessionStatus, ShellKind};
    use std::cell::Cell;
    use std::marker::PhantomData;
    use std::time::Duration;

    /// Surface that may move between threads but not be shared between them.
    struct ThreadBoundSurface {
        inner: RecordingSurface,
        _not_sync: PhantomData<Cell<()>>,
    }

    impl RenderSurface for ThreadBoundSurface {
        fn clear(&mut self) {
            self.inner.clear();
        }

        fn write(&mut self, data: &str) {
            self.inner.write(data);
        }

        fn fit(&mut self, geometry: Geometry) -> (u16, u16) {
            self.inner.fit(geometry)
        }
    }

    async fn setup(output_cap: usize) -> (SessionStore, Arc<MockPty>, RenderReconciler) {
        let store = SessionStore::new(output_cap);
        let pty = Arc::new(MockPty::new());
        let reconciler = RenderReconciler::new(store.clone(), pty.clone(), TerminalConfig::default());
        (store, pty, reconciler)
    }

    #[tokio::test]
    async fn test_attach_replays_and_switch_clears() {
        let (store, _pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        let b = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "a1 ").await;
        store.append_output(&a.id, "a2").await;
        store.append_output(&b.id, "b1").await;

        let surface = RecordingSurface::new();
        reconciler.attach(surface.clone(), Some(a.id.clone()));
        settle().await;
        assert_eq!(surface.screen(), "a1 a2");

        let clears_before = surface.clears();
        reconciler.show_session(Some(b.id.clone()));
        settle().await;
        assert_eq!(surface.screen(), "b1");
        assert!(surface.clears() > clears_before);

        reconciler.detach().await;
        assert!(!reconciler.is_attached());
        assert!(reconciler.stats().await.is_none());
    }

    #[tokio::test]
    async fn test_incremental_writes_each_chunk_once() {
        let (store, _pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "$ ").await;

        let surface = RecordingSurface::new();
        reconciler.attach(surface.clone(), Some(a.id.clone()));
        settle().await;

        store.append_output(&a.id, "ls\r\n").await;
        store.append_output(&a.id, "Cargo.toml\r\n").await;
        settle().await;

        assert_eq!(surface.screen(), "$ ls\r\nCargo.toml\r\n");
        assert_eq!(surface.writes(), vec!["$ ", "ls\r\n", "Cargo.toml\r\n"]);
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_reset_clears_and_rewrites() {
        let (store, _pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "old output").await;

        let surface = RecordingSurface::new();
        reconciler.attach(surface.clone(), Some(a.id.clone()));
        settle().await;

        store.clear_output(&a.id).await;
        store.append_output(&a.id, "fresh").await;
        settle().await;

        assert_eq!(surface.screen(), "fresh");
        let stats = reconciler.stats().await.unwrap();
        assert!(stats.full_replays >= 2);
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_output_at_cap_keeps_flowing() {
        let (store, _pty, mut reconciler) = setup(2).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "1").await;
        store.append_output(&a.id, "2").await;

        let surface = RecordingSurface::new();
        reconciler.attach(surface.clone(), Some(a.id.clone()));
        settle().await;

        store.append_output(&a.id, "3").await;
        settle().await;
        assert_eq!(surface.screen(), "123");
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_input_forwarded_only_to_live_session() {
        let (store, pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;

        reconciler.attach(RecordingSurface::new(), None);
        reconciler.input("dropped");
        settle().await;

        reconciler.show_session(Some(a.id.clone()));
        reconciler.input("ls\r");
        settle().await;

        store.set_status(&a.id, SessionStatus::Terminated).await;
        reconciler.input("also dropped");
        settle().await;

        assert_eq!(
            pty.calls(),
            vec![PtyCall::Write(a.id.clone(), b"ls\r".to_vec())]
        );
        assert_eq!(reconciler.stats().await.unwrap().inputs_dropped, 2);
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_surface_without_sync_can_be_driven() {
        let (store, pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "hello").await;
        let recording = RecordingSurface::new();

        reconciler.attach(
            ThreadBoundSurface {
                inner: recording.clone(),
                _not_sync: PhantomData,
            },
            Some(a.id.clone()),
        );
        reconciler.input("pwd\r");
        settle().await;

        assert_eq!(recording.screen(), "hello");
        assert_eq!(
            pty.calls(),
            vec![PtyCall::Write(a.id.clone(), b"pwd\r".to_vec())]
        );
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_removed_session_is_cleared_from_surface() {
        let (store, pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        store.append_output(&a.id, "doomed").await;

        let surface = RecordingSurface::new();
        reconciler.attach(surface.clone(), Some(a.id.clone()));
        settle().await;
        assert_eq!(surface.screen(), "doomed");

        store.set_status(&a.id, SessionStatus::Terminated).await;
        assert!(store.remove(&a.id).await);
        settle().await;

        assert_eq!(surface.screen(), "");
        let stats = reconciler.stats().await.unwrap();
        assert_eq!(stats.rendered, None);

        reconciler.input("ignored");
        settle().await;
        assert!(pty.calls().is_empty());
        reconciler.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_is_throttled_and_deduplicated() {
        let (store, pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        reconciler.attach(RecordingSurface::new(), Some(a.id.clone()));
        settle().await;

        for width in [800, 808, 816, 824, 960] {
            reconciler.geometry_changed(Geometry::new(width, 320));
        }
        settle().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pty.resizes(), vec![(a.id.clone(), 120, 20)]);

        // Same grid again: suppressed.
        reconciler.geometry_changed(Geometry::new(960, 320));
        // Degenerate: ignored outright.
        reconciler.geometry_changed(Geometry::new(0, 0));
        settle().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pty.resizes().len(), 1);

        reconciler.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_resends_current_size_once() {
        let (store, pty, mut reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        let b = store.create(ShellKind::Zsh, "/repo").await;
        reconciler.attach(RecordingSurface::new(), Some(a.id.clone()));
        reconciler.geometry_changed(Geometry::new(800, 480));
        settle().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        reconciler.show_session(Some(b.id.clone()));
        settle().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            pty.resizes(),
            vec![(a.id.clone(), 100, 30), (b.id.clone(), 100, 30)]
        );
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_accelerator_failure_keeps_software() {
        let (store, _pty, reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        let mut reconciler = reconciler.with_accelerator(Arc::new(MockAccelerator::failing()));
        let surface = RecordingSurface::new();

        reconciler.attach(surface.clone(), Some(a.id.clone()));
        store.append_output(&a.id, "still here").await;
        settle().await;

        let stats = reconciler.stats().await.unwrap();
        assert_eq!(stats.backend, RenderBackendKind::Software);
        assert_eq!(surface.screen(), "still here");
        reconciler.detach().await;
    }

    #[tokio::test]
    async fn test_accelerator_upgrade_and_graceful_loss() {
        let (store, _pty, reconciler) = setup(100).await;
        let a = store.create(ShellKind::Zsh, "/repo").await;
        let mut reconciler = reconciler.with_accelerator(Arc::new(MockAccelerator::working()));
        let surface = RecordingSurface::new();

        reconciler.attach(surface.clone(), Some(a.id.clone()));
        settle().await;
        assert_eq!(
            reconciler.stats().await.unwrap().backend,
            RenderBackendKind::Accelerated
        );
        assert_eq!(surface.backend(), RenderBackendKind::Accelerated);

        reconciler.accelerator_lost();
        store.append_output(&a.id, "after loss").await;
        settle().await;
        assert_eq!(
            reconciler.stats().await.unwrap().backend,
            RenderBackendKind::Software
        );
        assert_eq!(surface.screen(), "after loss");
        reconciler.detach().await;
    }
}
