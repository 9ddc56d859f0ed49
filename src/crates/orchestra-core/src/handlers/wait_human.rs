//! Human gate handler
//!
//! Offers the stage's outgoing edges as a multiple-choice question; the
//! selected edge's target becomes the suggested next stage. Edge labels
//! may carry accelerator keys (`[A]pprove`).

use std::sync::Arc;

use async_trait::async_trait;

use super::NodeHandler;
use crate::interviewer::{
    parse_accelerator, Answer, AnswerValue, ChoiceOption, Interviewer, Question,
};
use crate::model::{Context, Outcome, PipelineGraph, Stage};

#[derive(Debug, Clone)]
struct Choice {
    key: String,
    label: String,
    to_id: String,
}

pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        Self { interviewer }
    }

    fn find_matching(answer: &Answer, choices: &[Choice]) -> Option<Choice> {
        let value = answer.value_text().trim().to_uppercase();

        if let Some(choice) = choices.iter().find(|c| c.key.to_uppercase() == value) {
            return Some(choice.clone());
        }
        if let Some(choice) = choices.iter().find(|c| c.label.trim().to_uppercase() == value) {
            return Some(choice.clone());
        }
        if let Some(selected) = &answer.selected_option {
            return choices
                .iter()
                .find(|c| c.key.eq_ignore_ascii_case(&selected.key))
                .cloned();
        }
        None
    }

    fn success(choice: &Choice) -> Outcome {
        Outcome::success()
            .with_suggested_next(&choice.to_id)
            .with_update("human.gate.selected", choice.key.clone())
            .with_update("human.gate.label", choice.label.clone())
    }
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    async fn handle(&self, stage: &Stage, _context: &Context, graph: &PipelineGraph) -> Outcome {
        let choices: Vec<Choice> = graph
            .outgoing_edges(&stage.id)
            .into_iter()
            .map(|edge| {
                let raw = if edge.label.is_empty() { edge.to_id.clone() } else { edge.label.clone() };
                let (key, label) = parse_accelerator(&raw);
                Choice { key, label, to_id: edge.to_id.clone() }
            })
            .collect();

        if choices.is_empty() {
            return Outcome::fail("No outgoing edges for human gate");
        }

        let options: Vec<ChoiceOption> = choices
            .iter()
            .map(|c| ChoiceOption { key: c.key.clone(), label: c.label.clone() })
            .collect();
        let mut question = Question::multiple_choice(
            if stage.label.is_empty() { "Select an option:".to_string() } else { stage.label.clone() },
            options,
            &stage.id,
        );
        if let Some(timeout) = stage.attr_i64("human.timeout_seconds") {
            question.timeout_seconds = Some(timeout as f64);
        }

        let answer = self.interviewer.ask(&question);

        match answer.value {
            AnswerValue::Timeout => {
                let default_key = stage.attr_str("human.default_choice");
                if !default_key.is_empty() {
                    if let Some(choice) = choices
                        .iter()
                        .find(|c| c.key.eq_ignore_ascii_case(default_key.trim()))
                    {
                        return Self::success(choice);
                    }
                }
                Outcome::retry().with_notes("human gate timeout, no default")
            }
            AnswerValue::Skipped => Outcome::fail("human skipped interaction"),
            AnswerValue::Text(_) => {
                let choice = Self::find_matching(&answer, &choices)
                    .unwrap_or_else(|| choices[0].clone());
                Self::success(&choice)
            }
        }
    }
}
