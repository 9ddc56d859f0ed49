//! `orchestra cleanup` — remove stale session branches and orphaned
//! worktrees
//!
//! Branches belonging to sessions the store derives as running or paused
//! are preserved regardless of age.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use orchestra_core::config::load_config;
use orchestra_core::engine::session::extract_session_info;
use orchestra_store::CxdbClient;
use orchestra_workspace::git;
use orchestra_workspace::session_branch::resolve_repo_path;

use super::common;

pub fn cleanup(older_than: i64) -> anyhow::Result<()> {
    let config = load_config(None)?;
    if config.workspace.repos.is_empty() {
        println!("No workspace repos configured.");
        return Ok(());
    }

    let client = common::connect_store(&config)?;
    let active_sessions = active_session_ids(&client);
    client.close();

    let config_dir = config
        .config_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let mut removed_branches = Vec::new();
    let mut removed_worktrees = Vec::new();
    let mut preserved = 0usize;

    for (repo_name, repo_config) in &config.workspace.repos {
        let repo_path = resolve_repo_path(repo_config, &config_dir);
        if !repo_path.exists() || !git::is_git_repo(&repo_path) {
            continue;
        }

        let prefix = &repo_config.branch_prefix;
        let branches = git::list_branches(&format!("{prefix}*"), &repo_path).unwrap_or_default();

        for branch in branches {
            let session_id = extract_session_id(&branch, prefix);
            if !session_id.is_empty() && active_sessions.contains(&session_id) {
                preserved += 1;
                continue;
            }

            match branch_older_than(&branch, older_than, &repo_path) {
                Some(true) => {}
                _ => {
                    preserved += 1;
                    continue;
                }
            }

            match git::branch_delete(&branch, &repo_path) {
                Ok(()) => removed_branches.push(format!("{repo_name}:{branch}")),
                Err(e) => tracing::warn!(branch, error = %e, "failed to delete branch"),
            }
        }

        // Orphaned worktrees from sessions no longer active
        let worktree_base = repo_path.join(".orchestra").join("worktrees");
        if let Ok(entries) = std::fs::read_dir(&worktree_base) {
            for entry in entries.flatten() {
                let session_dir = entry.path();
                if !session_dir.is_dir() {
                    continue;
                }
                let session_id = entry.file_name().to_string_lossy().to_string();
                if active_sessions.contains(&session_id) {
                    continue;
                }
                if let Ok(worktrees) = std::fs::read_dir(&session_dir) {
                    for worktree in worktrees.flatten() {
                        if !worktree.path().is_dir() {
                            continue;
                        }
                        match git::worktree_remove(&worktree.path(), &repo_path) {
                            Ok(()) => removed_worktrees.push(format!(
                                "{repo_name}:{}",
                                worktree.path().display()
                            )),
                            Err(e) => {
                                tracing::warn!(path = %worktree.path().display(), error = %e, "failed to remove worktree")
                            }
                        }
                    }
                }
                let _ = std::fs::remove_dir(&session_dir);
            }
        }
    }

    if !removed_branches.is_empty() {
        println!("Removed branches:");
        for branch in &removed_branches {
            println!("  {branch}");
        }
    }
    if !removed_worktrees.is_empty() {
        println!("Removed worktrees:");
        for worktree in &removed_worktrees {
            println!("  {worktree}");
        }
    }
    if preserved > 0 {
        println!("Preserved {preserved} active/recent branches.");
    }
    if removed_branches.is_empty() && removed_worktrees.is_empty() {
        println!("Nothing to clean up.");
    }

    Ok(())
}

/// Display ids of sessions the store derives as running or paused
fn active_session_ids(client: &CxdbClient) -> BTreeSet<String> {
    let mut active = BTreeSet::new();
    let Ok(contexts) = client.list_contexts() else { return active };

    for context in contexts {
        let context_id = context
            .get("context_id")
            .or_else(|| context.get("id"))
            .map(common::json_id)
            .unwrap_or_default();
        if context_id.is_empty() {
            continue;
        }
        let Ok(turns) = client.get_turns(&context_id, 500) else { continue };
        let info = extract_session_info(&context_id, &turns);
        if info.status.is_active() && !info.display_id.is_empty() {
            active.insert(info.display_id);
        }
    }
    active
}

/// Session id from a branch like `orchestra/pipeline-name/session-id`
fn extract_session_id(branch: &str, prefix: &str) -> String {
    let Some(remainder) = branch.strip_prefix(prefix) else {
        return String::new();
    };
    let parts: Vec<&str> = remainder.split('/').collect();
    if parts.len() >= 2 {
        parts.last().unwrap_or(&"").to_string()
    } else {
        String::new()
    }
}

/// Whether a branch tip is at least `days` old; `None` when unknown
fn branch_older_than(branch: &str, days: i64, repo_path: &Path) -> Option<bool> {
    let date_str = git::branch_date(branch, repo_path).ok()?;
    let tip: DateTime<Utc> = DateTime::parse_from_str(&date_str, "%Y-%m-%d %H:%M:%S %z")
        .ok()?
        .with_timezone(&Utc);
    Some((Utc::now() - tip).num_days() >= days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_session_id() {
        assert_eq!(extract_session_id("orchestra/demo/abc123", "orchestra/"), "abc123");
        assert_eq!(extract_session_id("orchestra/just-one", "orchestra/"), "");
        assert_eq!(extract_session_id("feature/foo", "orchestra/"), "");
    }
}
