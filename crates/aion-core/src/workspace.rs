//! Workspace snapshot: the multi-facet view of one repository.

use crate::git::{BranchList, CommitEntry, DiffResult, FileStatusEntry, StashEntry};
use serde::{Deserialize, Serialize};

/// Everything the git panel shows for one workspace path.
///
/// The diff, when present, always belongs to `selected_file`. Any change of
/// selection goes through [`WorkspaceSnapshot::select_file`], which drops it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    /// Repository root the snapshot was fetched for
    pub repo_path: Option<String>,
    pub statuses: Vec<FileStatusEntry>,
    pub selected_file: Option<String>,
    pub diff: Option<DiffResult>,
    /// Most recent first, bounded by the configured log limit
    pub commits: Vec<CommitEntry>,
    pub branches: BranchList,
    /// Ordered by stash index
    pub stashes: Vec<StashEntry>,
    pub loading: bool,
    /// Last caught failure, human readable
    pub error: Option<String>,
}

impl WorkspaceSnapshot {
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
            ..Self::default()
        }
    }

    /// Changes the selection. Returns `true` if it actually changed.
    pub fn select_file(&mut self, file: Option<String>) -> bool {
        if self.selected_file == file {
            return false;
        }
        self.selected_file = file;
        self.diff = None;
        true
    }

    /// Whether `file` is the current selection.
    pub fn is_selected(&self, file: &str) -> bool {
        self.selected_file.as_deref() == Some(file)
    }

    /// Staged flag of the selected file, as reported by the last status fetch.
    pub fn selected_is_staged(&self) -> bool {
        let Some(selected) = self.selected_file.as_deref() else {
            return false;
        };
        self.statuses
            .iter()
            .find(|entry| entry.path == selected)
            .map(|entry| entry.staged)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::DiffHunk;

    #[test]
    fn test_select_file_clears_stale_diff() {
        let mut snapshot = WorkspaceSnapshot::new("/repo");
        snapshot.select_file(Some("a.txt".into()));
        snapshot.diff = Some(DiffResult {
            hunks: vec![DiffHunk {
                header: "@@ -1 +1 @@".into(),
                lines: vec![],
            }],
        });

        assert!(!snapshot.select_file(Some("a.txt".into())));
        assert!(snapshot.diff.is_some());

        assert!(snapshot.select_file(Some("b.txt".into())));
        assert!(snapshot.diff.is_none());
        assert!(snapshot.is_selected("b.txt"));
    }

    #[test]
    fn test_selected_is_staged_reads_status() {
        let mut snapshot = WorkspaceSnapshot::new("/repo");
        snapshot.statuses = vec![FileStatusEntry {
            path: "a.txt".into(),
            status: "M".into(),
            staged: true,
            is_binary: false,
        }];
        assert!(!snapshot.selected_is_staged());
        snapshot.select_file(Some("a.txt".into()));
        assert!(snapshot.selected_is_staged());
    }
}
