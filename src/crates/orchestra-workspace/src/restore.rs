//! Git-state restore for replay
//!
//! Replaying from a checkpoint checks each repo out at the SHA its
//! workspace snapshot recorded. Missing repos are skipped with a warning
//! so a partial workspace still replays.

use std::collections::BTreeMap;
use std::path::Path;

use orchestra_core::config::RepoConfig;

use crate::git;
use crate::session_branch::resolve_repo_path;

/// Check out the recorded SHA in each snapshot repo
pub fn restore_git_state(
    workspace_snapshot: &BTreeMap<String, String>,
    repos: &BTreeMap<String, RepoConfig>,
    config_dir: &Path,
) {
    for (repo_name, target_sha) in workspace_snapshot {
        let Some(repo_config) = repos.get(repo_name) else {
            tracing::warn!(repo = %repo_name, "repo in snapshot but not in config — skipping");
            continue;
        };

        let repo_path = resolve_repo_path(repo_config, config_dir);
        if !repo_path.exists() {
            tracing::warn!(path = %repo_path.display(), "repo path does not exist — skipping");
            continue;
        }

        match git::rev_parse("HEAD", &repo_path) {
            Ok(current) if &current == target_sha => {
                tracing::info!(repo = %repo_name, sha = &target_sha[..8.min(target_sha.len())], "already at snapshot");
            }
            Ok(_) => {
                if let Err(e) = git::checkout(target_sha, &repo_path) {
                    tracing::warn!(repo = %repo_name, error = %e, "failed to restore snapshot SHA");
                } else {
                    tracing::info!(repo = %repo_name, sha = &target_sha[..8.min(target_sha.len())], "restored");
                }
            }
            Err(e) => {
                tracing::warn!(repo = %repo_name, error = %e, "failed to read HEAD");
            }
        }
    }
}
