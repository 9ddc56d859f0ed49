//! Interactive conversation handler
//!
//! Alternates agent turns with human replies until the human issues
//! `/done` or `/approve` (accept) or `/reject` (fail). Conversation
//! history is kept in context so a resumed session can replay it into the
//! backend.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::NodeHandler;
use crate::backend::ConversationalBackend;
use crate::config::OrchestraConfig;
use crate::interviewer::{Interviewer, Question};
use crate::model::{Context, Outcome, PipelineGraph, Stage};
use crate::prompts::compose_stage_prompt;

const DONE_COMMANDS: [&str; 2] = ["/done", "/approve"];
const REJECT_COMMANDS: [&str; 1] = ["/reject"];

type HistoryEntry = (String, String);

pub struct InteractiveHandler {
    backend: Arc<dyn ConversationalBackend>,
    interviewer: Arc<dyn Interviewer>,
    config: Arc<OrchestraConfig>,
    pipeline_dir: Option<PathBuf>,
}

impl InteractiveHandler {
    pub fn new(
        backend: Arc<dyn ConversationalBackend>,
        interviewer: Arc<dyn Interviewer>,
        config: Arc<OrchestraConfig>,
        pipeline_dir: Option<PathBuf>,
    ) -> Self {
        Self { backend, interviewer, config, pipeline_dir }
    }

    fn load_history(context: &Context) -> Vec<HistoryEntry> {
        context
            .get("interactive.history")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| {
                        Some((
                            e.get("agent")?.as_str()?.to_string(),
                            e.get("human")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn history_json(history: &[HistoryEntry]) -> serde_json::Value {
        json!(history
            .iter()
            .map(|(agent, human)| json!({"agent": agent, "human": human}))
            .collect::<Vec<_>>())
    }

    fn format_conversation(history: &[HistoryEntry]) -> String {
        history
            .iter()
            .flat_map(|(agent, human)| [format!("Agent: {agent}"), format!("Human: {human}")])
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn replay_history(&self, stage: &Stage, context: &Context, history: &[HistoryEntry]) {
        for (agent, human) in history {
            self.interviewer.inform(&format!("[resumed] Agent: {agent}"), &stage.id);
            self.interviewer.inform(&format!("[resumed] You: {human}"), &stage.id);
            // Rebuild backend conversation state from the transcript
            let _ = self.backend.send_message(stage, agent, context).await;
            if !human.is_empty() {
                let _ = self.backend.send_message(stage, human, context).await;
            }
        }
    }
}

#[async_trait]
impl NodeHandler for InteractiveHandler {
    async fn handle(&self, stage: &Stage, context: &Context, _graph: &PipelineGraph) -> Outcome {
        let prompt = match compose_stage_prompt(
            stage,
            context,
            &self.config,
            self.pipeline_dir.as_deref(),
        ) {
            Ok(prompt) => prompt,
            Err(e) => return Outcome::fail(format!("prompt composition failed: {e}")),
        };

        let mut history = Self::load_history(context);
        if !history.is_empty() {
            self.replay_history(stage, context, &history).await;
        }

        let mut agent_text = match self.backend.send_message(stage, &prompt, context).await {
            Ok(text) => text,
            Err(outcome) => return outcome,
        };

        loop {
            let question = Question::freeform(&agent_text, &stage.id);
            let answer = self.interviewer.ask(&question);
            let human_text = if answer.text.is_empty() {
                answer.value_text().to_string()
            } else {
                answer.text.clone()
            };

            let command = human_text.trim().to_lowercase();
            if DONE_COMMANDS.contains(&command.as_str()) {
                history.push((agent_text.clone(), human_text));
                break;
            }
            if REJECT_COMMANDS.contains(&command.as_str()) {
                history.push((agent_text.clone(), human_text));
                self.backend.reset_conversation();
                return Outcome::fail("human rejected in interactive mode")
                    .with_notes(Self::format_conversation(&history))
                    .with_update("interactive.history", Self::history_json(&history));
            }

            history.push((agent_text.clone(), human_text.clone()));

            agent_text = match self.backend.send_message(stage, &human_text, context).await {
                Ok(text) => text,
                Err(outcome) => {
                    self.backend.reset_conversation();
                    return outcome;
                }
            };
        }

        self.backend.reset_conversation();
        Outcome::success()
            .with_notes(Self::format_conversation(&history))
            .with_update("interactive.history", Self::history_json(&history))
            .with_update("last_response", agent_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CodergenBackend, OnTurnCallback};
    use crate::interviewer::{Answer, QueueInterviewer};
    use crate::model::{OutcomeStatus, Shape};
    use std::sync::Mutex;

    /// Echoes scripted agent replies and records received messages
    struct ScriptedConversation {
        replies: Mutex<std::collections::VecDeque<String>>,
        received: Mutex<Vec<String>>,
        resets: Mutex<u32>,
    }

    impl ScriptedConversation {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                received: Mutex::new(Vec::new()),
                resets: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CodergenBackend for ScriptedConversation {
        async fn run(
            &self,
            _stage: &Stage,
            _prompt: &str,
            _context: &Context,
            _on_turn: Option<&OnTurnCallback>,
        ) -> Outcome {
            Outcome::success()
        }
    }

    #[async_trait]
    impl ConversationalBackend for ScriptedConversation {
        async fn send_message(
            &self,
            _stage: &Stage,
            message: &str,
            _context: &Context,
        ) -> Result<String, Outcome> {
            self.received.lock().unwrap().push(message.to_string());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "nothing more to say".to_string()))
        }

        fn reset_conversation(&self) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    fn interactive_stage() -> (Stage, PipelineGraph) {
        let stage = Stage::new("pair", Shape::InteractiveBox).with_prompt("Let's pair");
        let graph = PipelineGraph::new("g");
        (stage, graph)
    }

    #[tokio::test]
    async fn test_done_ends_with_success() {
        let backend = Arc::new(ScriptedConversation::new(vec!["draft ready"]));
        let interviewer = Arc::new(QueueInterviewer::new(vec![Answer::text_answer("/done")]));
        let handler = InteractiveHandler::new(
            backend.clone(),
            interviewer,
            Arc::new(OrchestraConfig::default()),
            None,
        );
        let (stage, graph) = interactive_stage();

        let outcome = handler.handle(&stage, &Context::new(), &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.notes.contains("draft ready"));
        assert_eq!(*backend.resets.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_multi_turn_then_reject() {
        let backend = Arc::new(ScriptedConversation::new(vec!["v1", "v2"]));
        let interviewer = Arc::new(QueueInterviewer::new(vec![
            Answer::text_answer("make it better"),
            Answer::text_answer("/reject"),
        ]));
        let handler = InteractiveHandler::new(
            backend.clone(),
            interviewer,
            Arc::new(OrchestraConfig::default()),
            None,
        );
        let (stage, graph) = interactive_stage();

        let outcome = handler.handle(&stage, &Context::new(), &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.failure_reason.contains("rejected"));
        // Prompt, then the human follow-up
        let received = backend.received.lock().unwrap();
        assert_eq!(received.as_slice(), ["Let's pair", "make it better"]);
    }

    #[tokio::test]
    async fn test_history_replay_on_resume() {
        let backend = Arc::new(ScriptedConversation::new(vec!["r1", "r2", "fresh"]));
        let interviewer = Arc::new(QueueInterviewer::new(vec![Answer::text_answer("/approve")]));
        let handler = InteractiveHandler::new(
            backend.clone(),
            interviewer,
            Arc::new(OrchestraConfig::default()),
            None,
        );
        let (stage, graph) = interactive_stage();

        let mut context = Context::new();
        context.set(
            "interactive.history",
            json!([{"agent": "old draft", "human": "tighten it"}]),
        );

        let outcome = handler.handle(&stage, &context, &graph).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        // Replay feeds the prior transcript back into the backend first
        let received = backend.received.lock().unwrap();
        assert_eq!(received.as_slice(), ["old draft", "tighten it", "Let's pair"]);
    }
}
