//! Workspace capability consumed by the engine
//!
//! The concrete git workspace manager lives in its own crate; the engine
//! only needs worktree allocation at fan-out, merging at fan-in, a HEAD
//! snapshot for checkpoints, and a working directory for tool stages.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value as JsonValue;

/// Result of merging parallel worktrees back into the session branch
#[derive(Debug, Clone, Default)]
pub struct WorktreeMergeSummary {
    pub success: bool,
    /// Per-repo conflict details (conflicting files and their markers)
    pub conflicts: JsonValue,
    /// Per-repo merged HEAD SHA on success
    pub merged_shas: BTreeMap<String, String>,
}

/// The engine-facing surface of the workspace manager
pub trait Workspace: Send + Sync {
    /// Materialize one worktree per configured repo for a parallel branch
    fn create_worktrees_for_branch(&self, branch_id: &str) -> Result<(), String>;

    /// Merge the named branches' worktrees into the session branch
    fn merge_worktrees(&self, branch_ids: &[String]) -> WorktreeMergeSummary;

    /// Current HEAD of each repo, empty when nothing advanced since the
    /// previous call
    fn workspace_snapshot(&self) -> BTreeMap<String, String>;

    /// Directory tool stages run in (the first configured repo)
    fn primary_repo_path(&self) -> Option<PathBuf>;
}
