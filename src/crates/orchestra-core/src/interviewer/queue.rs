//! Scripted interviewers for tests and unattended runs

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Answer, Interviewer, Question};

/// Returns queued answers in order; an empty queue answers with a timeout
pub struct QueueInterviewer {
    answers: Mutex<VecDeque<Answer>>,
    asked: Mutex<Vec<Question>>,
}

impl QueueInterviewer {
    pub fn new(answers: Vec<Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, answer: Answer) {
        self.answers.lock().unwrap().push_back(answer);
    }

    /// Questions seen so far, for assertions
    pub fn asked(&self) -> Vec<Question> {
        self.asked.lock().unwrap().clone()
    }
}

impl Interviewer for QueueInterviewer {
    fn ask(&self, question: &Question) -> Answer {
        self.asked.lock().unwrap().push(question.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Answer::timeout)
    }

    fn inform(&self, _message: &str, _stage: &str) {}
}

/// Always selects the first offered option
///
/// Used when no interviewer is wired, so human gates never block an
/// unattended run.
pub struct AutoApproveInterviewer;

impl Interviewer for AutoApproveInterviewer {
    fn ask(&self, question: &Question) -> Answer {
        match question.options.first() {
            Some(first) => Answer::selected(first.clone()),
            None => Answer::text_answer("yes"),
        }
    }

    fn inform(&self, _message: &str, _stage: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interviewer::{AnswerValue, ChoiceOption};

    #[test]
    fn test_queue_pops_in_order() {
        let interviewer = QueueInterviewer::new(vec![
            Answer::text_answer("first"),
            Answer::text_answer("second"),
        ]);
        let q = Question::freeform("?", "s");
        assert_eq!(interviewer.ask(&q).text, "first");
        assert_eq!(interviewer.ask(&q).text, "second");
        assert_eq!(interviewer.ask(&q).value, AnswerValue::Timeout);
    }

    #[test]
    fn test_auto_approve_selects_first_option() {
        let q = Question::multiple_choice(
            "?",
            vec![
                ChoiceOption { key: "A".into(), label: "Approve".into() },
                ChoiceOption { key: "R".into(), label: "Reject".into() },
            ],
            "s",
        );
        let answer = AutoApproveInterviewer.ask(&q);
        assert_eq!(answer.selected_option.unwrap().key, "A");
    }
}
