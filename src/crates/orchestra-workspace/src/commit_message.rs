//! Commit message generation
//!
//! Per-turn commits get a message from a generator: deterministic by
//! default, optionally delegated to a cheap model with the deterministic
//! form as fallback.

/// Produces a commit message from the staged diff and the agent's intent
pub trait CommitMessageGenerator: Send + Sync {
    fn generate(&self, diff: &str, intent: &str) -> String;
}

/// Derives the file list from the diff headers
pub struct DeterministicCommitMessageGenerator;

impl CommitMessageGenerator for DeterministicCommitMessageGenerator {
    fn generate(&self, diff: &str, _intent: &str) -> String {
        let files: Vec<&str> = diff
            .lines()
            .filter(|line| line.starts_with("diff --git"))
            .filter_map(|line| line.rsplit(" b/").next())
            .collect();
        let file_list = if files.is_empty() {
            "agent changes".to_string()
        } else {
            files.join(", ")
        };
        format!("chore: auto-commit agent changes\n\nFiles: {file_list}")
    }
}

/// Prompt for model-generated commit messages
pub const COMMIT_MESSAGE_PROMPT: &str = "\
Generate a conventional commit message for the following git diff.

Agent intent: {intent}

Staged diff:
```
{diff}
```

Rules:
- First line: imperative summary under 72 characters (e.g. \"feat: add login endpoint\")
- Blank line after summary
- Brief description (1-3 lines) of what changed and why
- Use conventional commit prefixes: feat, fix, refactor, chore, docs, test, style
- Do NOT include any markdown formatting or code blocks
- Output ONLY the commit message, nothing else
";

/// Delegates to a closure (typically a backend call), falling back to the
/// deterministic generator on empty output or failure
pub struct DelegatingCommitMessageGenerator<F> {
    delegate: F,
}

impl<F> DelegatingCommitMessageGenerator<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn new(delegate: F) -> Self {
        Self { delegate }
    }
}

impl<F> CommitMessageGenerator for DelegatingCommitMessageGenerator<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn generate(&self, diff: &str, intent: &str) -> String {
        let truncated = if diff.len() > 4000 { &diff[..4000] } else { diff };
        let prompt = COMMIT_MESSAGE_PROMPT
            .replace("{intent}", intent)
            .replace("{diff}", truncated);
        match (self.delegate)(&prompt) {
            Some(message) if !message.trim().is_empty() => message.trim().to_string(),
            _ => DeterministicCommitMessageGenerator.generate(diff, intent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/src/main.rs b/src/main.rs\nindex 111..222 100644\n--- a/src/main.rs\n+++ b/src/main.rs\n@@ -1 +1 @@\n-old\n+new\ndiff --git a/README.md b/README.md\n";

    #[test]
    fn test_deterministic_lists_files() {
        let message = DeterministicCommitMessageGenerator.generate(DIFF, "intent");
        assert!(message.starts_with("chore: auto-commit agent changes"));
        assert!(message.contains("src/main.rs, README.md"));
    }

    #[test]
    fn test_deterministic_empty_diff() {
        let message = DeterministicCommitMessageGenerator.generate("", "intent");
        assert!(message.contains("agent changes"));
    }

    #[test]
    fn test_delegating_uses_delegate_output() {
        let generator =
            DelegatingCommitMessageGenerator::new(|_prompt| Some("feat: real message".to_string()));
        assert_eq!(generator.generate(DIFF, "x"), "feat: real message");
    }

    #[test]
    fn test_delegating_falls_back_on_empty() {
        let generator = DelegatingCommitMessageGenerator::new(|_prompt| None);
        assert!(generator.generate(DIFF, "x").starts_with("chore:"));

        let generator = DelegatingCommitMessageGenerator::new(|_prompt| Some("   ".to_string()));
        assert!(generator.generate(DIFF, "x").starts_with("chore:"));
    }
}
