//! Operator-facing event output

use super::dispatcher::EventObserver;
use super::types::Event;

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

/// Prints one line per event to stdout
pub struct StdoutObserver;

impl EventObserver for StdoutObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::PipelineStarted { pipeline_name, goal, .. } => {
                println!("[Pipeline] Started: {pipeline_name} (goal: {goal})");
            }
            Event::PipelineCompleted { pipeline_name, duration_ms, .. } => {
                println!("[Pipeline] Completed: {pipeline_name} ({duration_ms}ms)");
            }
            Event::PipelineFailed { pipeline_name, error, .. } => {
                println!("[Pipeline] FAILED: {pipeline_name} — {error}");
            }
            Event::PipelinePaused { pipeline_name, checkpoint_node_id, .. } => {
                println!("[Pipeline] Paused: {pipeline_name} at {checkpoint_node_id}");
            }
            Event::StageStarted { node_id, handler_type } => {
                println!("  [Stage] Started: {node_id} ({handler_type})");
            }
            Event::StageCompleted { node_id, status, duration_ms, response, .. } => {
                println!("  [Stage] Completed: {node_id} — {status} ({duration_ms}ms)");
                if !response.is_empty() {
                    println!("    Response: {}", truncate(response, 200));
                }
            }
            Event::StageFailed { node_id, error, .. } => {
                println!("  [Stage] FAILED: {node_id} — {error}");
            }
            Event::StageRetrying { node_id, attempt, max_attempts, delay_ms } => {
                println!(
                    "  [Stage] Retrying: {node_id} (attempt {attempt}/{max_attempts}, delay {delay_ms}ms)"
                );
            }
            Event::CheckpointSaved { node_id, .. } => {
                println!("  [Checkpoint] Saved at: {node_id}");
            }
            Event::AgentTurnCompleted { node_id, turn_number, model, token_usage, files_written, .. } => {
                let token_str = if token_usage.total() > 0 {
                    format!(" — {} tokens", token_usage.total())
                } else {
                    String::new()
                };
                println!("  [AgentTurn] {node_id} turn {turn_number} ({model}){token_str}");
                for f in files_written {
                    println!("    wrote: {f}");
                }
            }
            Event::ParallelStarted { node_id, branch_count } => {
                println!("  [Parallel] Started: {node_id} ({branch_count} branches)");
            }
            Event::ParallelBranchStarted { branch_id, .. } => {
                println!("    [Branch] Started: {branch_id}");
            }
            Event::ParallelBranchCompleted { branch_id, status, duration_ms, .. } => {
                println!("    [Branch] Completed: {branch_id} — {status} ({duration_ms}ms)");
            }
            Event::ParallelCompleted { node_id, success_count, failure_count, .. } => {
                println!(
                    "  [Parallel] Completed: {node_id} ({success_count} succeeded, {failure_count} failed)"
                );
            }
            Event::SessionBranchCreated { repo_name, branch_name, .. } => {
                println!("  [Workspace] Branch created: {branch_name} in {repo_name}");
            }
            Event::AgentCommitCreated { sha, message, files, .. } => {
                let summary = truncate(message.lines().next().unwrap_or(""), 60);
                println!("  [Commit] {} {summary} ({} files)", short_sha(sha), files.len());
            }
            Event::WorktreeCreated { repo_name, branch_id, worktree_branch, .. } => {
                println!("  [Worktree] Created: {branch_id} in {repo_name} ({worktree_branch})");
            }
            Event::WorktreeMerged { branch_ids, merged_sha, .. } => {
                println!("  [Worktree] Merged: {} → {}", branch_ids.join(", "), short_sha(merged_sha));
            }
            Event::WorktreeMergeConflict { branch_ids, conflicting_files, .. } => {
                println!(
                    "  [Worktree] CONFLICT: {} — {} files",
                    branch_ids.join(", "),
                    conflicting_files.len()
                );
            }
            Event::WorkspaceSnapshotRecorded { node_id, workspace_snapshot } => {
                let repos: Vec<String> = workspace_snapshot
                    .iter()
                    .map(|(k, v)| format!("{k}={}", short_sha(v)))
                    .collect();
                println!("  [Snapshot] {node_id}: {}", repos.join(", "));
            }
        }
    }
}
