//! Worktree allocation and merge
//!
//! Each parallel branch gets one worktree per repo at
//! `.orchestra/worktrees/<session-id>/<branch-id>`, checked out on a
//! fresh branch derived from the session branch. At fan-in the session
//! branch merges each worktree branch with `--no-ff --no-commit` followed
//! by a merge commit; a conflict aborts that repo's merge and captures
//! the conflicting file contents.

use std::collections::BTreeMap;
use std::path::PathBuf;

use orchestra_core::events::{Event, EventDispatcher};
use serde_json::json;

use crate::error::Result;
use crate::git;
use crate::manager::RepoContext;

/// Outcome of merging a set of branches across all repos
#[derive(Debug, Clone, Default)]
pub struct WorktreeMergeResult {
    pub success: bool,
    /// repo name → conflict details (files, markers, failed branch)
    pub conflicts: BTreeMap<String, serde_json::Value>,
    /// repo name → merged HEAD SHA on success
    pub merged_shas: BTreeMap<String, String>,
}

pub struct WorktreeManager {
    repo_contexts: BTreeMap<String, RepoContext>,
    session_id: String,
    pipeline_name: String,
    branch_prefix: String,
    dispatcher: EventDispatcher,
}

impl WorktreeManager {
    pub fn new(
        repo_contexts: BTreeMap<String, RepoContext>,
        session_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        branch_prefix: impl Into<String>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            repo_contexts,
            session_id: session_id.into(),
            pipeline_name: pipeline_name.into(),
            branch_prefix: branch_prefix.into(),
            dispatcher,
        }
    }

    fn worktree_base_dir(&self, repo: &RepoContext) -> PathBuf {
        repo.path.join(".orchestra").join("worktrees").join(&self.session_id)
    }

    fn worktree_branch_name(&self, branch_id: &str) -> String {
        format!(
            "{}{}/{}/{branch_id}",
            self.branch_prefix, self.pipeline_name, self.session_id
        )
    }

    /// Materialize one worktree per repo for a parallel branch
    pub fn create_worktrees(&self, branch_id: &str) -> Result<BTreeMap<String, RepoContext>> {
        let mut result = BTreeMap::new();

        for (repo_name, repo) in &self.repo_contexts {
            let worktree_path = self.worktree_base_dir(repo).join(branch_id);
            let worktree_branch = self.worktree_branch_name(branch_id);

            git::worktree_add(&worktree_path, &worktree_branch, &repo.path)?;

            self.dispatcher.emit(Event::WorktreeCreated {
                repo_name: repo_name.clone(),
                branch_id: branch_id.to_string(),
                worktree_path: worktree_path.to_string_lossy().to_string(),
                worktree_branch: worktree_branch.clone(),
            });

            result.insert(
                repo_name.clone(),
                RepoContext {
                    name: repo.name.clone(),
                    path: repo.path.clone(),
                    branch: worktree_branch,
                    base_sha: repo.base_sha.clone(),
                    worktree_path: Some(worktree_path),
                },
            );
        }

        Ok(result)
    }

    /// Merge the branches' worktrees into each repo's session branch
    ///
    /// On full success all worktree directories are removed and their
    /// branches deleted. A conflict in any repo aborts that repo's merge
    /// and leaves other repos untouched.
    pub fn merge_worktrees(&self, branch_ids: &[String]) -> WorktreeMergeResult {
        let mut conflicts = BTreeMap::new();
        let mut merged_shas = BTreeMap::new();

        for (repo_name, repo) in &self.repo_contexts {
            match self.merge_repo(repo, branch_ids) {
                Ok(None) => {
                    if let Ok(sha) = git::rev_parse("HEAD", &repo.path) {
                        merged_shas.insert(repo_name.clone(), sha);
                    }
                }
                Ok(Some(conflict)) => {
                    conflicts.insert(repo_name.clone(), conflict);
                }
                Err(e) => {
                    conflicts.insert(
                        repo_name.clone(),
                        json!({"error": e.to_string(), "conflicting_files": []}),
                    );
                }
            }
        }

        let success = conflicts.is_empty();
        if success {
            self.cleanup_worktrees(branch_ids);
            self.dispatcher.emit(Event::WorktreeMerged {
                repo_name: "all".to_string(),
                branch_ids: branch_ids.to_vec(),
                merged_sha: merged_shas.values().next().cloned().unwrap_or_default(),
            });
        } else {
            let conflicting_files: Vec<String> = conflicts
                .values()
                .filter_map(|c| c.get("conflicting_files")?.as_array().cloned())
                .flatten()
                .filter_map(|f| f.as_str().map(String::from))
                .collect();
            self.dispatcher.emit(Event::WorktreeMergeConflict {
                repo_name: "all".to_string(),
                branch_ids: branch_ids.to_vec(),
                conflicting_files,
            });
        }

        WorktreeMergeResult { success, conflicts, merged_shas }
    }

    /// Merge every branch into one repo's session branch
    ///
    /// Returns `Some(details)` on conflict, `None` on success.
    fn merge_repo(
        &self,
        repo: &RepoContext,
        branch_ids: &[String],
    ) -> Result<Option<serde_json::Value>> {
        git::checkout(&repo.branch, &repo.path)?;

        for branch_id in branch_ids {
            let worktree_branch = self.worktree_branch_name(branch_id);
            if git::merge_no_commit(&worktree_branch, &repo.path).is_err() {
                let conflicting = git::merge_conflicts(&repo.path).unwrap_or_default();
                let mut markers = BTreeMap::new();
                for file in &conflicting {
                    if let Ok(content) = std::fs::read_to_string(repo.path.join(file)) {
                        markers.insert(file.clone(), content);
                    }
                }
                let _ = git::merge_abort(&repo.path);
                return Ok(Some(json!({
                    "conflicting_files": conflicting,
                    "conflicts": markers,
                    "failed_branch_id": branch_id,
                })));
            }
            // A merge that stages nothing has no tree to commit
            if git::status_porcelain(&repo.path)?.is_empty() {
                continue;
            }
            git::commit(
                &format!("Merge {branch_id} into session branch"),
                "Orchestra <orchestra@local>",
                &[],
                &repo.path,
            )?;
        }

        Ok(None)
    }

    /// Remove worktree directories and delete their branches
    pub fn cleanup_worktrees(&self, branch_ids: &[String]) {
        for (repo_name, repo) in &self.repo_contexts {
            for branch_id in branch_ids {
                let worktree_path = self.worktree_base_dir(repo).join(branch_id);
                if worktree_path.exists() {
                    if let Err(e) = git::worktree_remove(&worktree_path, &repo.path) {
                        tracing::warn!(
                            repo = %repo_name,
                            branch_id,
                            error = %e,
                            "failed to remove worktree"
                        );
                    }
                }
                let worktree_branch = self.worktree_branch_name(branch_id);
                if let Err(e) = git::branch_delete(&worktree_branch, &repo.path) {
                    tracing::warn!(
                        repo = %repo_name,
                        branch = %worktree_branch,
                        error = %e,
                        "failed to delete worktree branch"
                    );
                }
            }
        }
    }
}
