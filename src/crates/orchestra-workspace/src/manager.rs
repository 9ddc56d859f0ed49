//! The workspace manager
//!
//! Owns session-branch lifecycle, converts agent turns into per-turn
//! commits with structured trailers, allocates and merges worktrees for
//! parallel branches, and reports HEAD snapshots for checkpoints. It is
//! both an event observer (watching stage boundaries to learn the
//! current node) and the target of the on-turn callback.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use orchestra_core::config::OrchestraConfig;
use orchestra_core::events::{Event, EventDispatcher, EventObserver};
use orchestra_core::handlers::{Workspace, WorktreeMergeSummary};
use orchestra_core::model::AgentTurn;
use parking_lot::Mutex;

use crate::commit_message::CommitMessageGenerator;
use crate::error::Result;
use crate::git;
use crate::session_branch::{
    create_session_branches, restore_original_branches, SessionBranchInfo,
};
use crate::worktree::{WorktreeManager, WorktreeMergeResult};

/// One repo's live checkout state
#[derive(Debug, Clone)]
pub struct RepoContext {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub base_sha: String,
    /// Set while the repo is materialized in a parallel-branch worktree
    pub worktree_path: Option<PathBuf>,
}

#[derive(Default)]
struct ManagerState {
    branch_infos: BTreeMap<String, SessionBranchInfo>,
    repo_contexts: BTreeMap<String, RepoContext>,
    pipeline_name: String,
    session_id: String,
    current_node_id: String,
    /// branch id → per-repo worktree contexts
    active_worktrees: BTreeMap<String, BTreeMap<String, RepoContext>>,
    /// HEADs as of the last snapshot call
    last_snapshot: BTreeMap<String, String>,
}

pub struct WorkspaceManager {
    config: Arc<OrchestraConfig>,
    dispatcher: EventDispatcher,
    commit_gen: Arc<dyn CommitMessageGenerator>,
    state: Mutex<ManagerState>,
}

impl WorkspaceManager {
    pub fn new(
        config: Arc<OrchestraConfig>,
        dispatcher: EventDispatcher,
        commit_gen: Arc<dyn CommitMessageGenerator>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            commit_gen,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn has_workspace(&self) -> bool {
        !self.config.workspace.repos.is_empty()
    }

    fn config_dir(&self) -> PathBuf {
        self.config
            .config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Create a session branch in every configured repo
    pub fn setup_session(&self, pipeline_name: &str, session_id: &str) -> Result<()> {
        let branch_infos = create_session_branches(
            &self.config.workspace.repos,
            pipeline_name,
            session_id,
            &self.config_dir(),
        )?;

        let mut state = self.state.lock();
        state.pipeline_name = pipeline_name.to_string();
        state.session_id = session_id.to_string();
        state.repo_contexts = branch_infos
            .iter()
            .map(|(name, info)| {
                (
                    name.clone(),
                    RepoContext {
                        name: name.clone(),
                        path: info.repo_path.clone(),
                        branch: info.branch_name.clone(),
                        base_sha: info.base_sha.clone(),
                        worktree_path: None,
                    },
                )
            })
            .collect();
        state.branch_infos = branch_infos;

        for info in state.branch_infos.values() {
            self.dispatcher.emit(Event::SessionBranchCreated {
                repo_name: info.repo_name.clone(),
                branch_name: info.branch_name.clone(),
                base_sha: info.base_sha.clone(),
                repo_path: info.repo_path.to_string_lossy().to_string(),
            });
        }
        Ok(())
    }

    /// Restore original branches; session branches stay for inspection
    ///
    /// Repos with a `push` policy get their session branch pushed to the
    /// configured remote first. Push failures are logged and skipped.
    pub fn teardown_session(&self) {
        let state = self.state.lock();
        for (repo_name, info) in &state.branch_infos {
            let Some(repo_config) = self.config.workspace.repos.get(repo_name) else {
                continue;
            };
            if repo_config.push.is_empty() || repo_config.remote.is_empty() {
                continue;
            }
            if let Err(e) = git::push("origin", &info.branch_name, &info.repo_path) {
                tracing::warn!(repo = %repo_name, error = %e, "failed to push session branch");
            }
        }
        if !state.branch_infos.is_empty() {
            restore_original_branches(&state.branch_infos);
        }
    }

    fn worktree_manager(&self) -> WorktreeManager {
        let state = self.state.lock();
        let branch_prefix = state
            .repo_contexts
            .keys()
            .next()
            .and_then(|name| self.config.workspace.repos.get(name))
            .map(|repo| repo.branch_prefix.clone())
            .unwrap_or_else(|| "orchestra/".to_string());
        WorktreeManager::new(
            state.repo_contexts.clone(),
            state.session_id.clone(),
            state.pipeline_name.clone(),
            branch_prefix,
            self.dispatcher.clone(),
        )
    }

    pub fn create_worktrees(&self, branch_id: &str) -> Result<BTreeMap<String, RepoContext>> {
        let contexts = self.worktree_manager().create_worktrees(branch_id)?;
        self.state
            .lock()
            .active_worktrees
            .insert(branch_id.to_string(), contexts.clone());
        Ok(contexts)
    }

    pub fn merge_branch_worktrees(&self, branch_ids: &[String]) -> WorktreeMergeResult {
        let result = self.worktree_manager().merge_worktrees(branch_ids);
        if result.success {
            let mut state = self.state.lock();
            for branch_id in branch_ids {
                state.active_worktrees.remove(branch_id);
            }
        }
        result
    }

    /// Process one finished agent turn: commit its writes, then announce it
    ///
    /// A turn with no file writes produces no commit but still emits
    /// `AgentTurnCompleted` with an empty SHA. Committing is the critical
    /// path: a git failure propagates (after the turn event fires) so the
    /// enclosing stage fails instead of running on with uncommitted
    /// mutations.
    pub fn on_turn(&self, turn: &mut AgentTurn) -> Result<()> {
        let node_id = {
            let state = self.state.lock();
            if state.current_node_id.is_empty() {
                "unknown".to_string()
            } else {
                state.current_node_id.clone()
            }
        };

        let commit_result = if turn.files_written.is_empty() {
            Ok(())
        } else {
            self.commit_turn(turn, &node_id)
        };
        self.emit_turn_completed(turn, &node_id);
        commit_result
    }

    fn commit_turn(&self, turn: &mut AgentTurn, node_id: &str) -> Result<()> {
        let (repo_contexts, pipeline_name, session_id) = {
            let state = self.state.lock();
            (
                state.repo_contexts.clone(),
                state.pipeline_name.clone(),
                state.session_id.clone(),
            )
        };

        for (repo_name, repo) in &repo_contexts {
            let cwd = self.resolve_commit_cwd(repo_name, repo);
            let repo_files = match_files_to_repo(&turn.files_written, &cwd);
            if repo_files.is_empty() {
                continue;
            }

            git::add(&repo_files, &cwd)?;
            let staged = git::diff(true, &cwd)?;
            if staged.is_empty() {
                continue;
            }

            let message = self.commit_gen.generate(&staged, &turn.intent());
            let author = format!("{node_id} ({}) <orchestra@local>", turn.model);
            let trailers = vec![
                ("Orchestra-Model".to_string(), turn.model.clone()),
                ("Orchestra-Provider".to_string(), turn.provider.clone()),
                ("Orchestra-Node".to_string(), node_id.to_string()),
                ("Orchestra-Pipeline".to_string(), pipeline_name.clone()),
                ("Orchestra-Session".to_string(), session_id.clone()),
                ("Orchestra-Turn".to_string(), turn.turn_number.to_string()),
            ];

            let sha = git::commit(&message, &author, &trailers, &cwd)?;
            turn.git_sha = sha.clone();
            turn.commit_message = message.clone();

            self.dispatcher.emit(Event::AgentCommitCreated {
                repo_name: repo_name.clone(),
                node_id: node_id.to_string(),
                sha,
                message,
                files: repo_files.clone(),
                turn_number: turn.turn_number,
            });
        }

        Ok(())
    }

    /// Pick the directory a commit for this repo lands in: the active
    /// worktree when one exists, the repo checkout otherwise
    fn resolve_commit_cwd(&self, repo_name: &str, repo: &RepoContext) -> PathBuf {
        let state = self.state.lock();
        for worktrees in state.active_worktrees.values() {
            if let Some(worktree) = worktrees.get(repo_name) {
                if let Some(path) = &worktree.worktree_path {
                    return path.clone();
                }
            }
        }
        repo.worktree_path.clone().unwrap_or_else(|| repo.path.clone())
    }

    fn emit_turn_completed(&self, turn: &AgentTurn, node_id: &str) {
        let messages = if turn.messages.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&turn.messages).unwrap_or_default()
        };
        let tool_calls = if turn.tool_calls.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&turn.tool_calls).unwrap_or_default()
        };

        self.dispatcher.emit(Event::AgentTurnCompleted {
            node_id: node_id.to_string(),
            turn_number: turn.turn_number,
            model: turn.model.clone(),
            provider: turn.provider.clone(),
            messages,
            tool_calls,
            files_written: turn.files_written.clone(),
            token_usage: turn.token_usage,
            git_sha: turn.git_sha.clone(),
            commit_message: turn.commit_message.clone(),
        });
    }

    /// Current HEAD of each repo, empty when nothing advanced since the
    /// previous call
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut state = self.state.lock();
        let mut current = BTreeMap::new();
        for (repo_name, repo) in &state.repo_contexts {
            if let Ok(sha) = git::rev_parse("HEAD", &repo.path) {
                current.insert(repo_name.clone(), sha);
            }
        }
        if current == state.last_snapshot {
            return BTreeMap::new();
        }
        state.last_snapshot = current.clone();
        current
    }
}

/// Keep only files that resolve inside the repo (or worktree) directory
fn match_files_to_repo(files: &[String], repo_path: &Path) -> Vec<String> {
    let repo_canonical = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());
    files
        .iter()
        .filter_map(|file| {
            let path = Path::new(file);
            let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            canonical
                .starts_with(&repo_canonical)
                .then(|| canonical.to_string_lossy().to_string())
        })
        .collect()
}

impl EventObserver for WorkspaceManager {
    fn on_event(&self, event: &Event) {
        match event {
            Event::StageStarted { node_id, .. } => {
                self.state.lock().current_node_id = node_id.clone();
            }
            Event::StageCompleted { .. } | Event::StageFailed { .. } => {
                self.state.lock().current_node_id.clear();
            }
            _ => {}
        }
    }
}

impl Workspace for WorkspaceManager {
    fn create_worktrees_for_branch(&self, branch_id: &str) -> std::result::Result<(), String> {
        self.create_worktrees(branch_id)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn merge_worktrees(&self, branch_ids: &[String]) -> WorktreeMergeSummary {
        let result = self.merge_branch_worktrees(branch_ids);
        WorktreeMergeSummary {
            success: result.success,
            conflicts: serde_json::to_value(&result.conflicts).unwrap_or_default(),
            merged_shas: result.merged_shas,
        }
    }

    fn workspace_snapshot(&self) -> BTreeMap<String, String> {
        self.snapshot()
    }

    fn primary_repo_path(&self) -> Option<PathBuf> {
        let state = self.state.lock();
        state.repo_contexts.values().next().map(|repo| {
            repo.worktree_path.clone().unwrap_or_else(|| repo.path.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_message::DeterministicCommitMessageGenerator;
    use crate::git::testing::init_repo;
    use orchestra_core::config::RepoConfig;
    use orchestra_core::events::dispatcher::testing::RecordingObserver;

    fn manager_with_repo(
        dir: &Path,
    ) -> (Arc<WorkspaceManager>, Arc<RecordingObserver>, PathBuf) {
        let repo = init_repo(&dir.join("app"));

        let mut config = OrchestraConfig::default();
        config.config_dir = Some(dir.to_path_buf());
        config.workspace.repos.insert(
            "app".to_string(),
            RepoConfig { path: "app".into(), ..Default::default() },
        );

        let recorder = Arc::new(RecordingObserver::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_observer(recorder.clone());

        let manager = Arc::new(WorkspaceManager::new(
            Arc::new(config),
            dispatcher,
            Arc::new(DeterministicCommitMessageGenerator),
        ));
        (manager, recorder, repo)
    }

    fn turn_with_write(repo: &Path, node_id: &str) -> AgentTurn {
        let file = repo.join("output.py");
        std::fs::write(&file, "print('hi')\n").unwrap();
        AgentTurn {
            node_id: node_id.to_string(),
            ..AgentTurn::new(1, node_id)
        }
        .with_model("sim-model", "simulation")
        .with_files_written(vec![file.to_string_lossy().to_string()])
    }

    #[test]
    fn test_setup_emits_session_branch_created() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, recorder, repo) = manager_with_repo(dir.path());

        manager.setup_session("demo", "s1").unwrap();
        assert_eq!(git::current_branch(&repo).unwrap(), "orchestra/demo/s1");
        assert!(recorder.event_types().contains(&"SessionBranchCreated"));

        manager.teardown_session();
        assert_eq!(git::current_branch(&repo).unwrap(), "main");
        // Idempotent
        manager.teardown_session();
        assert_eq!(git::current_branch(&repo).unwrap(), "main");
    }

    #[test]
    fn test_turn_commit_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, recorder, repo) = manager_with_repo(dir.path());
        manager.setup_session("demo", "s1").unwrap();

        // The manager learns the current node from stage events
        manager.on_event(&Event::StageStarted {
            node_id: "plan".into(),
            handler_type: "codergen".into(),
        });

        let mut turn = turn_with_write(&repo, "plan");
        manager.on_turn(&mut turn).unwrap();

        assert_eq!(turn.git_sha.len(), 40);
        assert!(turn.commit_message.starts_with("chore:"));

        let head = git::run_git(&["log", "-1", "--format=%an%n%B"], &repo).unwrap();
        assert!(head.contains("plan (sim-model)"));
        for trailer in [
            "Orchestra-Model: sim-model",
            "Orchestra-Provider: simulation",
            "Orchestra-Node: plan",
            "Orchestra-Pipeline: demo",
            "Orchestra-Session: s1",
            "Orchestra-Turn: 1",
        ] {
            assert!(head.contains(trailer), "missing trailer {trailer} in {head}");
        }

        // The emitted event carries the same SHA
        let emitted_sha = recorder
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::AgentTurnCompleted { git_sha, .. } => Some(git_sha),
                _ => None,
            })
            .unwrap();
        assert_eq!(emitted_sha, turn.git_sha);
    }

    #[test]
    fn test_turn_without_writes_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, recorder, repo) = manager_with_repo(dir.path());
        manager.setup_session("demo", "s1").unwrap();
        let base = git::rev_parse("HEAD", &repo).unwrap();

        let mut turn = AgentTurn::new(1, "plan").with_model("m", "p");
        manager.on_turn(&mut turn).unwrap();

        assert_eq!(turn.git_sha, "");
        assert_eq!(git::rev_parse("HEAD", &repo).unwrap(), base);
        // The turn event still fires, with an empty SHA
        let emitted = recorder
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::AgentTurnCompleted { git_sha, .. } => Some(git_sha),
                _ => None,
            })
            .unwrap();
        assert_eq!(emitted, "");
    }

    #[test]
    fn test_commit_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, recorder, repo) = manager_with_repo(dir.path());
        manager.setup_session("demo", "s1").unwrap();

        manager.on_event(&Event::StageStarted {
            node_id: "plan".into(),
            handler_type: "codergen".into(),
        });

        // A reported write that does not exist on disk makes `git add`
        // fail; the commit path is critical, so the error surfaces
        let missing = repo.join("ghost.py");
        let mut turn = AgentTurn::new(1, "plan")
            .with_model("m", "p")
            .with_files_written(vec![missing.to_string_lossy().to_string()]);

        let err = manager.on_turn(&mut turn).unwrap_err();
        assert!(err.to_string().contains("git command failed"));
        assert_eq!(turn.git_sha, "");

        // The turn event still fires so the store records the attempt
        assert!(recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::AgentTurnCompleted { git_sha, .. } if git_sha.is_empty())));
    }

    #[test]
    fn test_files_outside_repo_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _, repo) = manager_with_repo(dir.path());
        manager.setup_session("demo", "s1").unwrap();
        let base = git::rev_parse("HEAD", &repo).unwrap();

        let outside = dir.path().join("elsewhere.txt");
        std::fs::write(&outside, "x").unwrap();
        let mut turn = AgentTurn::new(1, "plan")
            .with_model("m", "p")
            .with_files_written(vec![outside.to_string_lossy().to_string()]);
        manager.on_turn(&mut turn).unwrap();

        assert_eq!(turn.git_sha, "");
        assert_eq!(git::rev_parse("HEAD", &repo).unwrap(), base);
    }

    #[test]
    fn test_snapshot_only_reports_movement() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _, repo) = manager_with_repo(dir.path());
        manager.setup_session("demo", "s1").unwrap();

        let first = manager.snapshot();
        assert_eq!(first["app"].len(), 40);
        // No movement since the last call
        assert!(manager.snapshot().is_empty());

        manager.on_event(&Event::StageStarted {
            node_id: "plan".into(),
            handler_type: "codergen".into(),
        });
        let mut turn = turn_with_write(&repo, "plan");
        manager.on_turn(&mut turn).unwrap();

        let moved = manager.snapshot();
        assert_eq!(moved["app"], turn.git_sha);
    }
}
