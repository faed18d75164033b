//! Keeps a [`WorkspaceSnapshot`] in step with one repository.
//!
//! The orchestrator fetches the snapshot facets concurrently, listens for
//! change notifications while mounted, and wraps every mutating git command
//! in the same invoke/refresh/record-error pattern.
//!
//! Concurrent refreshes are allowed and the last one to finish wins. Results
//! are committed only if no path change, selection change or unmount happened
//! while they were in flight; `loading` stays raised while any refresh runs.

use aion_core::backend::GitBackend;
use aion_core::config::WorkspaceConfig;
use aion_core::error::{AionError, Result};
use aion_core::event::{Channel, EventSource, Subscription};
use aion_core::git::{CommandOutcome, CommitInfo, StashAction, StashResult};
use aion_core::workspace::WorkspaceSnapshot;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deadline::wait_until;

/// Per-mount resources, released on unmount.
struct Mount {
    path: String,
    cancel: CancellationToken,
    /// Root returned by `watch_start`, once it resolves
    watch_root: Arc<Mutex<Option<String>>>,
}

struct Inner {
    git: Arc<dyn GitBackend>,
    source: Arc<dyn EventSource>,
    config: WorkspaceConfig,
    snapshot: watch::Sender<WorkspaceSnapshot>,
    /// Bumped on every path change, selection change and unmount
    generation: AtomicU64,
    in_flight: AtomicUsize,
    mount: Mutex<Option<Mount>>,
}

/// Cloneable handle; clones share one snapshot.
#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    inner: Arc<Inner>,
}

/// Lowers `loading` when the last concurrent refresh ends, however it ends.
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightGuard {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: inner.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.snapshot.send_modify(|s| s.loading = false);
        }
    }
}

impl WorkspaceOrchestrator {
    pub fn new(
        git: Arc<dyn GitBackend>,
        source: Arc<dyn EventSource>,
        config: WorkspaceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                git,
                source,
                config,
                snapshot: watch::Sender::new(WorkspaceSnapshot::default()),
                generation: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                mount: Mutex::new(None),
            }),
        }
    }

    // ============================================================================
    // Reading
    // ============================================================================

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<WorkspaceSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn mounted_path(&self) -> Option<String> {
        self.lock_mount().as_ref().map(|m| m.path.clone())
    }

    fn lock_mount(&self) -> std::sync::MutexGuard<'_, Option<Mount>> {
        self.inner.mount.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn require_path(&self) -> Result<String> {
        self.mounted_path()
            .ok_or_else(|| AionError::not_found("workspace", "<none mounted>"))
    }

    // ============================================================================
    // Mount lifecycle
    // ============================================================================

    /// Starts tracking `path`: watcher, change listener, initial refresh.
    ///
    /// Mounting a different path tears the previous mount down. Mounting the
    /// current path again is a no-op.
    pub async fn mount(&self, path: impl Into<String>) {
        let path = path.into();

        // Swap under one lock so overlapping mounts each release exactly the
        // mount they replaced.
        let previous = {
            let mut slot = self.lock_mount();
            if slot.as_ref().map(|m| m.path.as_str()) == Some(path.as_str()) {
                return;
            }

            self.bump_generation();
            self.inner
                .snapshot
                .send_replace(WorkspaceSnapshot::new(path.clone()));

            let mount = Mount {
                path: path.clone(),
                cancel: CancellationToken::new(),
                watch_root: Arc::new(Mutex::new(None)),
            };
            self.spawn_watcher(&mount);
            self.spawn_change_listener(&mount);
            slot.replace(mount)
        };

        if let Some(previous) = previous {
            self.release(previous).await;
        }

        info!("[WorkspaceOrchestrator] Mounted {}", path);
        self.refresh().await;
    }

    /// Releases the watcher, the change listener and any pending refresh timer.
    pub async fn unmount(&self) {
        let Some(mount) = self.lock_mount().take() else {
            return;
        };
        self.bump_generation();
        self.release(mount).await;
    }

    async fn release(&self, mount: Mount) {
        mount.cancel.cancel();

        let root = mount
            .watch_root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(root) = root {
            if let Err(e) = self.inner.git.watch_stop(&root).await {
                debug!("[WorkspaceOrchestrator] watch_stop({}) failed: {}", root, e);
            }
        }
        info!("[WorkspaceOrchestrator] Unmounted {}", mount.path);
    }

    fn spawn_watcher(&self, mount: &Mount) {
        let git = self.inner.git.clone();
        let path = mount.path.clone();
        let cancel = mount.cancel.clone();
        let slot = mount.watch_root.clone();

        tokio::spawn(async move {
            let root = match git.watch_start(&path).await {
                Ok(root) => root,
                Err(e) => {
                    // Expected for paths that are not repositories.
                    debug!("[WorkspaceOrchestrator] Watcher not started for {}: {}", path, e);
                    return;
                }
            };

            let late = {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if cancel.is_cancelled() {
                    true
                } else {
                    *slot = Some(root.clone());
                    false
                }
            };

            if late {
                debug!(
                    "[WorkspaceOrchestrator] Watcher for {} resolved after unmount, stopping",
                    root
                );
                if let Err(e) = git.watch_stop(&root).await {
                    debug!("[WorkspaceOrchestrator] watch_stop({}) failed: {}", root, e);
                }
            } else {
                debug!("[WorkspaceOrchestrator] Watching {}", root);
            }
        });
    }

    fn spawn_change_listener(&self, mount: &Mount) {
        let this = self.clone();
        let cancel = mount.cancel.clone();

        tokio::spawn(async move {
            let sub = match this.inner.source.listen(Channel::GitChanged).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!("[WorkspaceOrchestrator] Failed to listen for changes: {}", e);
                    return;
                }
            };
            if cancel.is_cancelled() {
                debug!("[WorkspaceOrchestrator] Change subscription resolved after unmount, releasing");
                return;
            }
            this.debounce_changes(sub, cancel).await;
        });
    }

    /// Collapses bursts of change notifications into one refresh per quiet
    /// window.
    async fn debounce_changes(&self, mut sub: Subscription, cancel: CancellationToken) {
        let window = self.inner.config.refresh_debounce();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = sub.recv() => match change {
                    Some(_) => deadline = Some(Instant::now() + window),
                    None => break,
                },
                _ = wait_until(deadline) => {
                    deadline = None;
                    let this = self.clone();
                    tokio::spawn(async move { this.refresh().await });
                }
            }
        }
        debug!("[WorkspaceOrchestrator] Change listener finished");
    }

    // ============================================================================
    // Refresh
    // ============================================================================

    /// Re-fetches status, log, branches and stashes concurrently, plus the diff
    /// of the selected file.
    ///
    /// Failures are recorded in the snapshot's `error`; a diff failure alone
    /// only drops the diff.
    pub async fn refresh(&self) {
        let Some(path) = self.mounted_path() else {
            debug!("[WorkspaceOrchestrator] Refresh skipped, nothing mounted");
            return;
        };

        let generation = self.generation();
        let _guard = InFlightGuard::enter(&self.inner);
        let (selected, staged) = {
            let mut selected = None;
            let mut staged = false;
            self.inner.snapshot.send_modify(|s| {
                s.loading = true;
                s.error = None;
                selected = s.selected_file.clone();
                staged = s.selected_is_staged();
            });
            (selected, staged)
        };

        let git = &self.inner.git;
        let primary = async {
            tokio::try_join!(
                git.status(&path),
                git.log(&path, self.inner.config.log_limit, None),
                git.branches(&path),
                git.stash(&path, StashAction::List, None, None),
            )
        };
        let diff = async {
            match &selected {
                Some(file) => Some(git.diff(&path, file, staged).await),
                None => None,
            }
        };
        let (primary, diff) = tokio::join!(primary, diff);

        if self.generation() != generation {
            debug!("[WorkspaceOrchestrator] Discarding stale refresh for {}", path);
            return;
        }

        match primary {
            Ok((statuses, commits, branches, stash)) => {
                let diff = match diff {
                    Some(Ok(diff)) => Some(diff),
                    Some(Err(e)) => {
                        debug!("[WorkspaceOrchestrator] Diff unavailable, dropping it: {}", e);
                        None
                    }
                    None => None,
                };
                self.inner.snapshot.send_modify(|s| {
                    s.statuses = statuses;
                    s.commits = commits;
                    s.branches = branches;
                    s.stashes = stash.stashes;
                    s.diff = diff;
                });
            }
            Err(e) => {
                warn!("[WorkspaceOrchestrator] Refresh failed for {}: {}", path, e);
                self.inner
                    .snapshot
                    .send_modify(|s| s.error = Some(e.to_string()));
            }
        }
    }

    // ============================================================================
    // Selection
    // ============================================================================

    /// Changes the selected file and drops the diff that belonged to the old one.
    pub fn select_file(&self, file: Option<String>) {
        let mut changed = false;
        self.inner
            .snapshot
            .send_if_modified(|s| {
                changed = s.select_file(file);
                changed
            });
        if changed {
            self.bump_generation();
        }
    }

    /// Selects `file` and fetches its diff.
    ///
    /// The diff, or the failure, is committed only if the selection has not
    /// moved on since. The error is returned to the caller either way.
    pub async fn load_diff(&self, file: &str, staged: bool) -> Result<()> {
        let path = self.require_path()?;
        self.select_file(Some(file.to_string()));
        let generation = self.generation();

        match self.inner.git.diff(&path, file, staged).await {
            Ok(diff) => {
                if self.generation() == generation {
                    self.inner.snapshot.send_modify(|s| s.diff = Some(diff));
                } else {
                    debug!("[WorkspaceOrchestrator] Discarding stale diff for {}", file);
                }
                Ok(())
            }
            Err(e) => {
                if self.generation() == generation {
                    warn!("[WorkspaceOrchestrator] Diff failed for {}: {}", file, e);
                    self.inner
                        .snapshot
                        .send_modify(|s| s.error = Some(e.to_string()));
                } else {
                    debug!("[WorkspaceOrchestrator] Stale diff for {} failed: {}", file, e);
                }
                Err(e)
            }
        }
    }

    // ============================================================================
    // Mutations
    // ============================================================================

    /// Runs a mutating command: refresh on success, record and return the error
    /// on failure.
    async fn run_mutation<T, F, Fut>(&self, command: &'static str, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn GitBackend>, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = self.require_path()?;
        match call(self.inner.git.clone(), path).await {
            Ok(value) => {
                debug!("[WorkspaceOrchestrator] {} succeeded", command);
                self.refresh().await;
                Ok(value)
            }
            Err(e) => {
                warn!("[WorkspaceOrchestrator] {} failed: {}", command, e);
                self.inner
                    .snapshot
                    .send_modify(|s| s.error = Some(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn stage(&self, files: Vec<String>) -> Result<()> {
        self.run_mutation("stage", |git, path| async move {
            git.stage(&path, &files).await
        })
        .await
    }

    pub async fn unstage(&self, files: Vec<String>) -> Result<()> {
        self.run_mutation("unstage", |git, path| async move {
            git.unstage(&path, &files).await
        })
        .await
    }

    pub async fn commit(&self, message: &str, amend: bool) -> Result<CommitInfo> {
        let message = message.to_string();
        self.run_mutation("commit", |git, path| async move {
            git.commit(&path, &message, amend).await
        })
        .await
    }

    pub async fn checkout(&self, branch: &str, create: bool) -> Result<CommandOutcome> {
        let branch = branch.to_string();
        self.run_mutation("checkout", |git, path| async move {
            git.checkout(&path, &branch, create).await
        })
        .await
    }

    pub async fn delete_branch(&self, branch: &str, force: bool) -> Result<CommandOutcome> {
        let branch = branch.to_string();
        self.run_mutation("delete_branch", |git, path| async move {
            git.delete_branch(&path, &branch, force).await
        })
        .await
    }

    pub async fn fetch(&self, remote: Option<&str>) -> Result<CommandOutcome> {
        let remote = remote.map(str::to_string);
        self.run_mutation("fetch", |git, path| async move {
            git.fetch(&path, remote.as_deref()).await
        })
        .await
    }

    pub async fn push(
        &self,
        remote: Option<&str>,
        branch: Option<&str>,
        force: bool,
    ) -> Result<CommandOutcome> {
        let remote = remote.map(str::to_string);
        let branch = branch.map(str::to_string);
        self.run_mutation("push", |git, path| async move {
            git.push(&path, remote.as_deref(), branch.as_deref(), force)
                .await
        })
        .await
    }

    pub async fn pull(&self, remote: Option<&str>, branch: Option<&str>) -> Result<CommandOutcome> {
        let remote = remote.map(str::to_string);
        let branch = branch.map(str::to_string);
        self.run_mutation("pull", |git, path| async move {
            git.pull(&path, remote.as_deref(), branch.as_deref()).await
        })
        .await
    }

    pub async fn merge(&self, branch: &str, no_ff: bool) -> Result<CommandOutcome> {
        let branch = branch.to_string();
        self.run_mutation("merge", |git, path| async move {
            git.merge(&path, &branch, no_ff).await
        })
        .await
    }

    pub async fn cherry_pick(&self, commit: &str) -> Result<CommandOutcome> {
        let commit = commit.to_string();
        self.run_mutation("cherry_pick", |git, path| async move {
            git.cherry_pick(&path, &commit).await
        })
        .await
    }

    pub async fn create_tag(&self, tag: &str, target: Option<&str>) -> Result<CommandOutcome> {
        let tag = tag.to_string();
        let target = target.map(str::to_string);
        self.run_mutation("create_tag", |git, path| async move {
            git.create_tag(&path, &tag, target.as_deref()).await
        })
        .await
    }

    pub async fn delete_tag(&self, tag: &str) -> Result<CommandOutcome> {
        let tag = tag.to_string();
        self.run_mutation("delete_tag", |git, path| async move {
            git.delete_tag(&path, &tag).await
        })
        .await
    }

    pub async fn stash(
        &self,
        action: StashAction,
        message: Option<&str>,
        index: Option<u32>,
    ) -> Result<StashResult> {
        let message = message.map(str::to_string);
        self.run_mutation("stash", |git, path| async move {
            git.stash(&path, action, message.as_deref(), index).await
        })
        .await
    }
}
