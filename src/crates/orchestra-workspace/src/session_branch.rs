//! Session branch lifecycle
//!
//! At session start every configured repo records its original branch and
//! HEAD, then checks out `<prefix><sanitized-pipeline>/<session-id>`. At
//! teardown the original branches are restored; session branches stay for
//! post-mortem inspection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use orchestra_core::config::RepoConfig;
use regex::Regex;

use crate::error::{Result, WorkspaceError};
use crate::git;

/// One repo's session branch bookkeeping
#[derive(Debug, Clone)]
pub struct SessionBranchInfo {
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub branch_name: String,
    pub base_sha: String,
    pub original_branch: String,
}

/// How `prepare_repos` obtained each repo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareAction {
    Cloned,
    Fetched,
    None,
}

#[derive(Debug, Clone)]
pub struct PrepareResult {
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub action: PrepareAction,
}

/// Replace characters git refuses in branch names
pub fn sanitize_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_/.-]").expect("static regex");
    re.replace_all(name, "-").to_string()
}

/// Resolve a configured repo path against the config directory
pub fn resolve_repo_path(repo_config: &RepoConfig, config_dir: &Path) -> PathBuf {
    let path = Path::new(&repo_config.path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

/// Clone or fetch configured remotes before branching
///
/// A repo with no local checkout and no remote is a configuration error;
/// a missing checkout with a remote is cloned (honoring `clone_depth`),
/// and an existing checkout with a remote is fetched.
pub fn prepare_repos(
    repos: &BTreeMap<String, RepoConfig>,
    config_dir: &Path,
) -> Result<Vec<PrepareResult>> {
    let mut results = Vec::new();

    for (repo_name, repo_config) in repos {
        let repo_path = resolve_repo_path(repo_config, config_dir);
        let has_remote = !repo_config.remote.is_empty();
        let exists = repo_path.exists();
        let depth = (repo_config.clone_depth > 0).then_some(repo_config.clone_depth);

        let action = match (exists, has_remote) {
            (false, false) => {
                return Err(WorkspaceError::Config(format!(
                    "Repo '{repo_name}' path does not exist ({}) and no remote is configured. \
                     Either create the directory or set 'remote' in workspace.repos.{repo_name}.",
                    repo_path.display()
                )))
            }
            (false, true) => {
                git::clone(&repo_config.remote, &repo_path, depth)?;
                PrepareAction::Cloned
            }
            (true, true) => {
                git::fetch("origin", depth, &repo_path)?;
                PrepareAction::Fetched
            }
            (true, false) => PrepareAction::None,
        };

        results.push(PrepareResult {
            repo_name: repo_name.clone(),
            repo_path,
            action,
        });
    }

    Ok(results)
}

/// Create and check out a session branch in every configured repo
pub fn create_session_branches(
    repos: &BTreeMap<String, RepoConfig>,
    pipeline_name: &str,
    session_id: &str,
    config_dir: &Path,
) -> Result<BTreeMap<String, SessionBranchInfo>> {
    let safe_pipeline = sanitize_name(pipeline_name);
    let mut infos = BTreeMap::new();

    for (repo_name, repo_config) in repos {
        let repo_path = resolve_repo_path(repo_config, config_dir);
        if !repo_path.exists() {
            return Err(WorkspaceError::MissingRepo(repo_path));
        }
        if !git::is_git_repo(&repo_path) {
            return Err(WorkspaceError::NotARepo(repo_path));
        }

        let original_branch = git::current_branch(&repo_path)?;
        let base_sha = git::rev_parse("HEAD", &repo_path)?;
        let branch_name = format!("{}{safe_pipeline}/{session_id}", repo_config.branch_prefix);

        git::create_branch(&branch_name, &repo_path)?;

        infos.insert(
            repo_name.clone(),
            SessionBranchInfo {
                repo_name: repo_name.clone(),
                repo_path,
                branch_name,
                base_sha,
                original_branch,
            },
        );
    }

    Ok(infos)
}

/// Check the original branch back out in every repo
///
/// Failures are logged and skipped so one broken repo does not block the
/// rest of teardown; re-running on restored repos is a no-op.
pub fn restore_original_branches(infos: &BTreeMap<String, SessionBranchInfo>) {
    for info in infos.values() {
        if let Err(e) = git::checkout(&info.original_branch, &info.repo_path) {
            tracing::warn!(
                repo = %info.repo_name,
                branch = %info.original_branch,
                error = %e,
                "failed to restore original branch"
            );
        }
    }
}
