//! Human-interaction channel
//!
//! Human gates and interactive stages ask questions through an
//! [`Interviewer`]. The console implementation reads stdin; the queue
//! implementation feeds scripted answers to tests; auto-approve picks the
//! first offered option so unattended runs never block.

mod console;
mod queue;

pub use console::ConsoleInterviewer;
pub use queue::{AutoApproveInterviewer, QueueInterviewer};

/// What kind of answer a question expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionType {
    MultipleChoice,
    YesNo,
    Confirmation,
    Freeform,
}

/// One selectable option of a multiple-choice question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Accelerator key, e.g. `A` for `[A]pprove`
    pub key: String,
    pub label: String,
}

/// A question posed to the human
#[derive(Debug, Clone)]
pub struct Question {
    pub text: String,
    pub question_type: QuestionType,
    pub options: Vec<ChoiceOption>,
    /// Stage id the question belongs to
    pub stage: String,
    pub timeout_seconds: Option<f64>,
}

impl Question {
    pub fn freeform(text: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            question_type: QuestionType::Freeform,
            options: Vec::new(),
            stage: stage.into(),
            timeout_seconds: None,
        }
    }

    pub fn multiple_choice(
        text: impl Into<String>,
        options: Vec<ChoiceOption>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            question_type: QuestionType::MultipleChoice,
            options,
            stage: stage.into(),
            timeout_seconds: None,
        }
    }
}

/// The human's answer, or the sentinel for an absent one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerValue {
    Text(String),
    Timeout,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub value: AnswerValue,
    pub text: String,
    pub selected_option: Option<ChoiceOption>,
}

impl Answer {
    pub fn text_answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            value: AnswerValue::Text(text.clone()),
            text,
            selected_option: None,
        }
    }

    pub fn selected(option: ChoiceOption) -> Self {
        Self {
            value: AnswerValue::Text(option.key.clone()),
            text: option.label.clone(),
            selected_option: Some(option),
        }
    }

    pub fn timeout() -> Self {
        Self { value: AnswerValue::Timeout, text: String::new(), selected_option: None }
    }

    pub fn skipped() -> Self {
        Self { value: AnswerValue::Skipped, text: String::new(), selected_option: None }
    }

    /// The answer as comparable text, empty for sentinels
    pub fn value_text(&self) -> &str {
        match &self.value {
            AnswerValue::Text(t) => t,
            _ => "",
        }
    }
}

/// Poses questions to a human and relays answers
pub trait Interviewer: Send + Sync {
    fn ask(&self, question: &Question) -> Answer;

    fn inform(&self, message: &str, stage: &str) {
        let prefix = if stage.is_empty() { String::new() } else { format!("[{stage}] ") };
        println!("[i] {prefix}{message}");
    }
}

/// Split an accelerator label like `[A]pprove` into key and clean label
///
/// The bracketed character becomes the key and stays in the label
/// (`[A]pprove` → key `A`, label `Approve`). Labels without brackets use
/// their first character, uppercased.
pub fn parse_accelerator(label: &str) -> (String, String) {
    if let (Some(open), Some(close)) = (label.find('['), label.find(']')) {
        if close == open + 2 {
            let inner = &label[open + 1..close];
            let key = inner.to_uppercase();
            let clean = format!("{}{}{}", &label[..open], inner, &label[close + 1..]);
            return (key, clean);
        }
    }
    let key = label
        .chars()
        .next()
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_default();
    (key, label.to_string())
}
