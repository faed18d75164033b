//! Request/response command surface of the backend.
//!
//! The backend owns the PTY processes, the git executable and the usage
//! database. The client only sees these traits; transport is up to the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::git::{
    BranchList, CommandOutcome, CommitEntry, CommitInfo, DiffResult, FileStatusEntry, StashAction,
    StashResult,
};
use crate::session::ShellKind;
use crate::usage::{BudgetSummary, UsageQuery, UsageRecord};

/// Arguments for spawning the process behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub session_id: String,
    pub shell: Option<ShellKind>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

/// Commands addressed to the PTY service.
#[async_trait]
pub trait PtyBackend: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<()>;

    async fn write(&self, session_id: &str, data: &[u8]) -> Result<()>;

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()>;

    async fn kill(&self, session_id: &str) -> Result<()>;
}

/// Commands addressed to the git service. Every call takes the workspace path.
#[async_trait]
pub trait GitBackend: Send + Sync {
    async fn status(&self, path: &str) -> Result<Vec<FileStatusEntry>>;

    async fn diff(&self, path: &str, file: &str, staged: bool) -> Result<DiffResult>;

    async fn stage(&self, path: &str, files: &[String]) -> Result<()>;

    async fn unstage(&self, path: &str, files: &[String]) -> Result<()>;

    async fn commit(&self, path: &str, message: &str, amend: bool) -> Result<CommitInfo>;

    async fn log(&self, path: &str, limit: usize, branch: Option<&str>)
    -> Result<Vec<CommitEntry>>;

    async fn branches(&self, path: &str) -> Result<BranchList>;

    async fn checkout(&self, path: &str, branch: &str, create: bool) -> Result<CommandOutcome>;

    async fn delete_branch(&self, path: &str, branch: &str, force: bool)
    -> Result<CommandOutcome>;

    async fn fetch(&self, path: &str, remote: Option<&str>) -> Result<CommandOutcome>;

    async fn push(
        &self,
        path: &str,
        remote: Option<&str>,
        branch: Option<&str>,
        force: bool,
    ) -> Result<CommandOutcome>;

    async fn pull(
        &self,
        path: &str,
        remote: Option<&str>,
        branch: Option<&str>,
    ) -> Result<CommandOutcome>;

    async fn merge(&self, path: &str, branch: &str, no_ff: bool) -> Result<CommandOutcome>;

    async fn cherry_pick(&self, path: &str, commit: &str) -> Result<CommandOutcome>;

    async fn create_tag(&self, path: &str, tag: &str, target: Option<&str>)
    -> Result<CommandOutcome>;

    async fn delete_tag(&self, path: &str, tag: &str) -> Result<CommandOutcome>;

    async fn stash(
        &self,
        path: &str,
        action: StashAction,
        message: Option<&str>,
        index: Option<u32>,
    ) -> Result<StashResult>;

    /// Starts the change watcher and returns the resolved repository root.
    ///
    /// Fails for paths that are not repositories.
    async fn watch_start(&self, path: &str) -> Result<String>;

    async fn watch_stop(&self, path: &str) -> Result<()>;
}

/// Commands addressed to the usage store.
#[async_trait]
pub trait UsageBackend: Send + Sync {
    /// Matching records, most recent first.
    async fn query_usage(&self, query: &UsageQuery) -> Result<Vec<UsageRecord>>;

    async fn query_budget(&self, month: &str) -> Result<BudgetSummary>;

    async fn set_budget(&self, month: &str, limit_usd: f64) -> Result<()>;
}
