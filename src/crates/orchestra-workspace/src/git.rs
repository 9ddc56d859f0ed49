//! Thin wrappers over the `git` subprocess
//!
//! Every operation shells out to `git` in a given working directory and
//! returns trimmed stdout. Non-zero exits become [`GitError`] carrying
//! the command, status, and stderr.

use std::path::Path;
use std::process::Command;

use crate::error::{GitError, Result};

/// Run `git <args>` in `cwd`, returning trimmed stdout
pub fn run_git(args: &[&str], cwd: &Path) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output()?;
    if !output.status.success() {
        return Err(GitError {
            args: args.iter().map(|s| s.to_string()).collect(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn rev_parse(reference: &str, cwd: &Path) -> Result<String> {
    run_git(&["rev-parse", reference], cwd)
}

pub fn current_branch(cwd: &Path) -> Result<String> {
    run_git(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)
}

pub fn create_branch(name: &str, cwd: &Path) -> Result<()> {
    run_git(&["checkout", "-b", name], cwd).map(|_| ())
}

pub fn checkout(reference: &str, cwd: &Path) -> Result<()> {
    run_git(&["checkout", reference], cwd).map(|_| ())
}

pub fn add(paths: &[String], cwd: &Path) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["add", "--"];
    args.extend(paths.iter().map(String::as_str));
    run_git(&args, cwd).map(|_| ())
}

/// Commit staged changes and return the new HEAD SHA
pub fn commit(
    message: &str,
    author: &str,
    trailers: &[(String, String)],
    cwd: &Path,
) -> Result<String> {
    let trailer_args: Vec<String> = trailers
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();

    let mut args = vec!["commit", "--author", author, "-m", message];
    for trailer in &trailer_args {
        args.push("--trailer");
        args.push(trailer);
    }
    run_git(&args, cwd)?;
    rev_parse("HEAD", cwd)
}

pub fn status_porcelain(cwd: &Path) -> Result<String> {
    run_git(&["status", "--porcelain"], cwd)
}

pub fn diff(staged: bool, cwd: &Path) -> Result<String> {
    if staged {
        run_git(&["diff", "--cached"], cwd)
    } else {
        run_git(&["diff"], cwd)
    }
}

pub fn log(n: u32, format: &str, cwd: &Path) -> Result<String> {
    run_git(&["log", &format!("-n{n}"), &format!("--format={format}")], cwd)
}

pub fn is_git_repo(path: &Path) -> bool {
    path.exists() && run_git(&["rev-parse", "--is-inside-work-tree"], path).is_ok()
}

pub fn clone(remote: &str, target: &Path, depth: Option<u32>) -> Result<()> {
    let depth_arg = depth.map(|d| format!("--depth={d}"));
    let mut args = vec!["clone"];
    if let Some(depth_arg) = &depth_arg {
        args.push(depth_arg);
    }
    let target_str = target.to_string_lossy().to_string();
    args.push(remote);
    args.push(&target_str);

    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    run_git(&args, parent).map(|_| ())
}

pub fn fetch(remote: &str, depth: Option<u32>, cwd: &Path) -> Result<()> {
    let depth_arg = depth.map(|d| format!("--depth={d}"));
    let mut args = vec!["fetch"];
    if let Some(depth_arg) = &depth_arg {
        args.push(depth_arg);
    }
    args.push(remote);
    run_git(&args, cwd).map(|_| ())
}

pub fn push(remote: &str, branch: &str, cwd: &Path) -> Result<()> {
    run_git(&["push", "--set-upstream", remote, branch], cwd).map(|_| ())
}

pub fn worktree_add(worktree_path: &Path, branch: &str, cwd: &Path) -> Result<()> {
    run_git(
        &["worktree", "add", &worktree_path.to_string_lossy(), "-b", branch],
        cwd,
    )
    .map(|_| ())
}

pub fn worktree_remove(worktree_path: &Path, cwd: &Path) -> Result<()> {
    run_git(
        &["worktree", "remove", &worktree_path.to_string_lossy(), "--force"],
        cwd,
    )
    .map(|_| ())
}

/// Merge without fast-forward and without committing; the caller decides
/// whether to complete or abort
pub fn merge_no_commit(branch: &str, cwd: &Path) -> Result<()> {
    run_git(&["merge", "--no-ff", "--no-commit", branch], cwd).map(|_| ())
}

pub fn merge_abort(cwd: &Path) -> Result<()> {
    run_git(&["merge", "--abort"], cwd).map(|_| ())
}

/// Paths currently in the unmerged state
pub fn merge_conflicts(cwd: &Path) -> Result<Vec<String>> {
    let output = run_git(&["diff", "--name-only", "--diff-filter=U"], cwd)?;
    Ok(output.lines().map(String::from).collect())
}

pub fn branch_delete(name: &str, cwd: &Path) -> Result<()> {
    run_git(&["branch", "-D", name], cwd).map(|_| ())
}

/// Branch names matching a glob pattern
pub fn list_branches(pattern: &str, cwd: &Path) -> Result<Vec<String>> {
    let output = run_git(
        &["branch", "--list", pattern, "--format=%(refname:short)"],
        cwd,
    )?;
    Ok(output.lines().map(String::from).filter(|l| !l.is_empty()).collect())
}

/// Committer date of a branch tip, e.g. `2024-01-15 10:30:45 +0000`
pub fn branch_date(branch: &str, cwd: &Path) -> Result<String> {
    run_git(
        &["log", "-1", "--format=%ci", branch],
        cwd,
    )
}

#[cfg(test)]
pub mod testing {
    //! Scratch-repo helpers shared by the workspace test suites

    use super::*;
    use std::path::PathBuf;

    /// Initialize a repo with one commit on `main` and identity configured
    pub fn init_repo(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        run_git(&["init", "-b", "main"], dir).unwrap();
        run_git(&["config", "user.email", "test@local"], dir).unwrap();
        run_git(&["config", "user.name", "Test"], dir).unwrap();
        std::fs::write(dir.join("README.md"), "# scratch\n").unwrap();
        run_git(&["add", "."], dir).unwrap();
        run_git(&["commit", "-m", "initial"], dir).unwrap();
        dir.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::init_repo;
    use super::*;

    #[test]
    fn test_rev_parse_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        let sha = rev_parse("HEAD", &repo).unwrap();
        assert_eq!(sha.len(), 40);
        assert_eq!(current_branch(&repo).unwrap(), "main");
    }

    #[test]
    fn test_commit_with_trailers() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        std::fs::write(repo.join("output.py"), "print('hi')\n").unwrap();
        add(&[repo.join("output.py").to_string_lossy().to_string()], &repo).unwrap();
        let sha = commit(
            "feat: add output",
            "plan (sim) <orchestra@local>",
            &[("Orchestra-Node".into(), "plan".into())],
            &repo,
        )
        .unwrap();

        assert_eq!(sha.len(), 40);
        let body = run_git(&["log", "-1", "--format=%an%n%B"], &repo).unwrap();
        assert!(body.contains("plan (sim)"));
        assert!(body.contains("Orchestra-Node: plan"));
    }

    #[test]
    fn test_failed_command_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());

        let err = checkout("no-such-branch", &repo).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("git command failed"));
        assert!(text.contains("no-such-branch"));
    }

    #[test]
    fn test_is_git_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(dir.path()));
        init_repo(dir.path());
        assert!(is_git_repo(dir.path()));
    }

    #[test]
    fn test_list_branches() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        create_branch("orchestra/demo/abc123", &repo).unwrap();
        checkout("main", &repo).unwrap();

        let branches = list_branches("orchestra/*", &repo).unwrap();
        assert_eq!(branches, vec!["orchestra/demo/abc123".to_string()]);
    }
}
