//! Mock collaborators shared by the unit tests of this crate.

use aion_core::backend::{GitBackend, PtyBackend, SpawnRequest, UsageBackend};
use aion_core::error::{AionError, Result};
use aion_core::event::{Channel, EventSource, Subscription};
use aion_core::git::{
    BranchList, CommandOutcome, CommitEntry, CommitInfo, DiffHunk, DiffResult, FileStatusEntry,
    StashAction, StashEntry, StashResult,
};
use aion_core::usage::{BudgetSummary, UsageQuery, UsageRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::render::{Geometry, RenderAccelerator, RenderBackendKind, RenderSurface};

/// Lets spawned tasks on the current-thread test runtime catch up.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// PTY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyCall {
    Spawn(SpawnRequest),
    Write(String, Vec<u8>),
    Resize(String, u16, u16),
    Kill(String),
}

#[derive(Default)]
pub struct MockPty {
    calls: Mutex<Vec<PtyCall>>,
    fail_spawn: Mutex<bool>,
    fail_kill: Mutex<bool>,
}

impl MockPty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawn(&self) {
        *self.fail_spawn.lock().unwrap() = true;
    }

    pub fn fail_kill(&self) {
        *self.fail_kill.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<PtyCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawns(&self) -> Vec<SpawnRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PtyCall::Spawn(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PtyCall::Resize(id, cols, rows) => Some((id, cols, rows)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PtyCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PtyBackend for MockPty {
    async fn spawn(&self, request: SpawnRequest) -> Result<()> {
        if *self.fail_spawn.lock().unwrap() {
            return Err(AionError::backend("pty_spawn", "mock failure"));
        }
        self.record(PtyCall::Spawn(request));
        Ok(())
    }

    async fn write(&self, session_id: &str, data: &[u8]) -> Result<()> {
        self.record(PtyCall::Write(session_id.to_string(), data.to_vec()));
        Ok(())
    }

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.record(PtyCall::Resize(session_id.to_string(), cols, rows));
        Ok(())
    }

    async fn kill(&self, session_id: &str) -> Result<()> {
        self.record(PtyCall::Kill(session_id.to_string()));
        if *self.fail_kill.lock().unwrap() {
            return Err(AionError::backend("pty_kill", "mock failure"));
        }
        Ok(())
    }
}

// ============================================================================
// Git
// ============================================================================

/// In-memory git service. Commands can be made to fail or to block until a
/// gate token is cancelled.
pub struct MockGit {
    counts: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<&'static str, CancellationToken>>,
    watch_gates: Mutex<HashMap<String, CancellationToken>>,
    stopped: Mutex<Vec<String>>,
    branch: Mutex<String>,
}

impl MockGit {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            watch_gates: Mutex::new(HashMap::new()),
            stopped: Mutex::new(Vec::new()),
            branch: Mutex::new("main".to_string()),
        }
    }

    pub fn fail(&self, command: &'static str) {
        self.failing.lock().unwrap().insert(command);
    }

    pub fn recover(&self, command: &'static str) {
        self.failing.lock().unwrap().remove(command);
    }

    /// Blocks `command` until the returned token is cancelled.
    pub fn gate(&self, command: &'static str) -> CancellationToken {
        let token = CancellationToken::new();
        self.gates.lock().unwrap().insert(command, token.clone());
        token
    }

    /// Blocks `watch_start(path)` until the returned token is cancelled.
    pub fn gate_watch(&self, path: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.watch_gates
            .lock()
            .unwrap()
            .insert(path.to_string(), token.clone());
        token
    }

    pub fn set_branch(&self, branch: &str) {
        *self.branch.lock().unwrap() = branch.to_string();
    }

    pub fn count(&self, command: &'static str) -> usize {
        self.counts.lock().unwrap().get(command).copied().unwrap_or(0)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    async fn enter(&self, command: &'static str) -> Result<()> {
        *self.counts.lock().unwrap().entry(command).or_insert(0) += 1;
        let gate = self.gates.lock().unwrap().get(command).cloned();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }
        if self.failing.lock().unwrap().contains(command) {
            return Err(AionError::backend(format!("git_{command}"), "mock failure"));
        }
        Ok(())
    }

    fn ok() -> CommandOutcome {
        CommandOutcome {
            ok: true,
            detail: String::new(),
        }
    }
}

#[async_trait]
impl GitBackend for MockGit {
    async fn status(&self, _path: &str) -> Result<Vec<FileStatusEntry>> {
        self.enter("status").await?;
        Ok(vec![FileStatusEntry {
            path: "a.txt".into(),
            status: "M".into(),
            staged: false,
            is_binary: false,
        }])
    }

    async fn diff(&self, _path: &str, file: &str, _staged: bool) -> Result<DiffResult> {
        self.enter("diff").await?;
        Ok(DiffResult {
            hunks: vec![DiffHunk {
                header: format!("@@ {file} @@"),
                lines: vec![],
            }],
        })
    }

    async fn stage(&self, _path: &str, _files: &[String]) -> Result<()> {
        self.enter("stage").await
    }

    async fn unstage(&self, _path: &str, _files: &[String]) -> Result<()> {
        self.enter("unstage").await
    }

    async fn commit(&self, _path: &str, message: &str, _amend: bool) -> Result<CommitInfo> {
        self.enter("commit").await?;
        Ok(CommitInfo {
            oid: "abc1234".into(),
            message: message.to_string(),
            author: "tester".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        })
    }

    async fn log(
        &self,
        _path: &str,
        _limit: usize,
        _branch: Option<&str>,
    ) -> Result<Vec<CommitEntry>> {
        self.enter("log").await?;
        Ok(vec![CommitEntry {
            oid: "abc1234def".into(),
            short_oid: "abc1234".into(),
            message: "initial".into(),
            author: "tester".into(),
            date: "2026-01-01".into(),
            parents: vec![],
            refs: vec!["HEAD".into()],
        }])
    }

    async fn branches(&self, _path: &str) -> Result<BranchList> {
        self.enter("branches").await?;
        let current = self.branch.lock().unwrap().clone();
        Ok(BranchList {
            current: Some(current.clone()),
            local: vec![current],
            remote: vec!["origin/main".into()],
        })
    }

    async fn checkout(&self, _path: &str, _branch: &str, _create: bool) -> Result<CommandOutcome> {
        self.enter("checkout").await.map(|_| Self::ok())
    }

    async fn delete_branch(
        &self,
        _path: &str,
        _branch: &str,
        _force: bool,
    ) -> Result<CommandOutcome> {
        self.enter("delete_branch").await.map(|_| Self::ok())
    }

    async fn fetch(&self, _path: &str, _remote: Option<&str>) -> Result<CommandOutcome> {
        self.enter("fetch").await.map(|_| Self::ok())
    }

    async fn push(
        &self,
        _path: &str,
        _remote: Option<&str>,
        _branch: Option<&str>,
        _force: bool,
    ) -> Result<CommandOutcome> {
        self.enter("push").await.map(|_| Self::ok())
    }

    async fn pull(
        &self,
        _path: &str,
        _remote: Option<&str>,
        _branch: Option<&str>,
    ) -> Result<CommandOutcome> {
        self.enter("pull").await.map(|_| Self::ok())
    }

    async fn merge(&self, _path: &str, _branch: &str, _no_ff: bool) -> Result<CommandOutcome> {
        self.enter("merge").await.map(|_| Self::ok())
    }

    async fn cherry_pick(&self, _path: &str, _commit: &str) -> Result<CommandOutcome> {
        self.enter("cherry_pick").await.map(|_| Self::ok())
    }

    async fn create_tag(
        &self,
        _path: &str,
        _tag: &str,
        _target: Option<&str>,
    ) -> Result<CommandOutcome> {
        self.enter("create_tag").await.map(|_| Self::ok())
    }

    async fn delete_tag(&self, _path: &str, _tag: &str) -> Result<CommandOutcome> {
        self.enter("delete_tag").await.map(|_| Self::ok())
    }

    async fn stash(
        &self,
        _path: &str,
        action: StashAction,
        _message: Option<&str>,
        _index: Option<u32>,
    ) -> Result<StashResult> {
        self.enter("stash").await?;
        Ok(StashResult {
            action,
            stashes: vec![StashEntry {
                index: 0,
                message: "WIP on main".into(),
                oid: "def5678".into(),
            }],
            detail: String::new(),
        })
    }

    async fn watch_start(&self, path: &str) -> Result<String> {
        let gate = self.watch_gates.lock().unwrap().get(path).cloned();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }
        if self.failing.lock().unwrap().contains("watch_start") {
            return Err(AionError::watch(format!("{path} is not a git repository")));
        }
        Ok(path.to_string())
    }

    async fn watch_stop(&self, path: &str) -> Result<()> {
        // Real watchers stop asynchronously; give other tasks a turn.
        tokio::task::yield_now().await;
        self.stopped.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

// ============================================================================
// Usage
// ============================================================================

/// In-memory usage store. Budgets are kept per month; spend is summed over
/// every stored record.
#[derive(Default)]
pub struct MockUsage {
    records: Mutex<Vec<UsageRecord>>,
    budgets: Mutex<HashMap<String, f64>>,
    queries: Mutex<Vec<UsageQuery>>,
    counts: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<&'static str, CancellationToken>>,
}

impl MockUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, agent: &str, captured_at: &str, cost_usd: f64, tokens_total: i64) {
        let mut records = self.records.lock().unwrap();
        let id = records.len() as i64 + 1;
        records.push(UsageRecord {
            id,
            session_id: "s1".into(),
            agent: agent.into(),
            cost_usd,
            tokens_in: tokens_total,
            tokens_out: 0,
            tokens_total,
            duration_s: Some(3),
            captured_at: captured_at.into(),
            raw_output: String::new(),
        });
    }

    pub fn fail(&self, command: &'static str) {
        self.failing.lock().unwrap().insert(command);
    }

    pub fn recover(&self, command: &'static str) {
        self.failing.lock().unwrap().remove(command);
    }

    /// Blocks `command` until the returned token is cancelled.
    pub fn gate(&self, command: &'static str) -> CancellationToken {
        let token = CancellationToken::new();
        self.gates.lock().unwrap().insert(command, token.clone());
        token
    }

    pub fn count(&self, command: &'static str) -> usize {
        self.counts.lock().unwrap().get(command).copied().unwrap_or(0)
    }

    pub fn budget_for(&self, month: &str) -> Option<f64> {
        self.budgets.lock().unwrap().get(month).copied()
    }

    pub fn queries(&self) -> Vec<UsageQuery> {
        self.queries.lock().unwrap().clone()
    }

    async fn enter(&self, command: &'static str) -> Result<()> {
        *self.counts.lock().unwrap().entry(command).or_insert(0) += 1;
        let gate = self.gates.lock().unwrap().get(command).cloned();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }
        if self.failing.lock().unwrap().contains(command) {
            return Err(AionError::backend(command, "mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl UsageBackend for MockUsage {
    async fn query_usage(&self, query: &UsageQuery) -> Result<Vec<UsageRecord>> {
        self.queries.lock().unwrap().push(query.clone());
        self.enter("query_usage").await?;
        let mut records = self.records.lock().unwrap().clone();
        records.reverse();
        Ok(records)
    }

    async fn query_budget(&self, month: &str) -> Result<BudgetSummary> {
        self.enter("query_budget").await?;
        let limit_usd = self.budget_for(month).unwrap_or(0.0);
        let spent_usd: f64 = self.records.lock().unwrap().iter().map(|r| r.cost_usd).sum();
        Ok(BudgetSummary {
            month: month.to_string(),
            limit_usd,
            spent_usd,
            remaining_usd: (limit_usd - spent_usd).max(0.0),
            pct_used: if limit_usd > 0.0 {
                spent_usd / limit_usd * 100.0
            } else {
                0.0
            },
        })
    }

    async fn set_budget(&self, month: &str, limit_usd: f64) -> Result<()> {
        self.enter("set_budget").await?;
        self.budgets
            .lock()
            .unwrap()
            .insert(month.to_string(), limit_usd);
        Ok(())
    }
}

// ============================================================================
// Push channels
// ============================================================================

/// Event source whose registrations only complete once `open` is called.
pub struct GatedSource {
    inner: Arc<dyn EventSource>,
    gate: CancellationToken,
    resolved: AtomicUsize,
}

impl GatedSource {
    pub fn new(inner: Arc<dyn EventSource>) -> Self {
        Self {
            inner,
            gate: CancellationToken::new(),
            resolved: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.cancel();
    }

    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for GatedSource {
    async fn listen(&self, channel: Channel) -> Result<Subscription> {
        self.gate.cancelled().await;
        let sub = self.inner.listen(channel).await?;
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(sub)
    }
}

// ============================================================================
// Render surface
// ============================================================================

#[derive(Debug, Default)]
struct SurfaceState {
    screen: String,
    writes: Vec<String>,
    clears: usize,
    backend: RenderBackendKind,
}

/// Surface that records what it was asked to draw. Cells are 8x16 px.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(&self) -> String {
        self.state.lock().unwrap().screen.clone()
    }

    /// Writes since the last clear.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clears(&self) -> usize {
        self.state.lock().unwrap().clears
    }

    pub fn backend(&self) -> RenderBackendKind {
        self.state.lock().unwrap().backend
    }
}

impl RenderSurface for RecordingSurface {
    fn clear(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.screen.clear();
        state.writes.clear();
        state.clears += 1;
    }

    fn write(&mut self, data: &str) {
        let mut state = self.state.lock().unwrap();
        state.screen.push_str(data);
        state.writes.push(data.to_string());
    }

    fn fit(&mut self, geometry: Geometry) -> (u16, u16) {
        ((geometry.width_px / 8) as u16, (geometry.height_px / 16) as u16)
    }

    fn set_backend(&mut self, backend: RenderBackendKind) {
        self.state.lock().unwrap().backend = backend;
    }
}

pub struct MockAccelerator {
    works: bool,
}

impl MockAccelerator {
    pub fn working() -> Self {
        Self { works: true }
    }

    pub fn failing() -> Self {
        Self { works: false }
    }
}

#[async_trait]
impl RenderAccelerator for MockAccelerator {
    async fn init(&self) -> Result<()> {
        if self.works {
            Ok(())
        } else {
            Err(AionError::internal("no GPU context"))
        }
    }
}
