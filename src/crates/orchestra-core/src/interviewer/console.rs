//! Console interviewer reading stdin

use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::time::Duration;

use super::{Answer, ChoiceOption, Interviewer, Question, QuestionType};

/// Interviewer that prompts on stdout and reads answers from stdin
///
/// Input with a timeout runs the blocking read on a helper thread; an
/// expired timeout yields [`Answer::timeout`] so the handler can fall back
/// to the stage's default choice.
pub struct ConsoleInterviewer;

impl ConsoleInterviewer {
    pub fn new() -> Self {
        Self
    }

    fn read_line(&self, prompt: &str, timeout_seconds: Option<f64>) -> Option<String> {
        print!("{prompt}");
        let _ = std::io::stdout().flush();

        match timeout_seconds {
            None => {
                let mut line = String::new();
                match std::io::stdin().lock().read_line(&mut line) {
                    Ok(0) | Err(_) => None,
                    Ok(_) => Some(line.trim_end_matches('\n').to_string()),
                }
            }
            Some(secs) => {
                let (tx, rx) = mpsc::channel();
                std::thread::spawn(move || {
                    let mut line = String::new();
                    let result = match std::io::stdin().lock().read_line(&mut line) {
                        Ok(0) | Err(_) => None,
                        Ok(_) => Some(line.trim_end_matches('\n').to_string()),
                    };
                    let _ = tx.send(result);
                });
                rx.recv_timeout(Duration::from_secs_f64(secs)).ok().flatten()
            }
        }
    }

    fn find_option(response: &str, options: &[ChoiceOption]) -> Option<ChoiceOption> {
        options
            .iter()
            .find(|o| o.key.eq_ignore_ascii_case(response))
            .or_else(|| options.iter().find(|o| o.label.eq_ignore_ascii_case(response)))
            .cloned()
    }
}

impl Default for ConsoleInterviewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Interviewer for ConsoleInterviewer {
    fn ask(&self, question: &Question) -> Answer {
        println!("[?] {}", question.text);

        match question.question_type {
            QuestionType::MultipleChoice => {
                for option in &question.options {
                    println!("  [{}] {}", option.key, option.label);
                }
                let Some(response) = self.read_line("Select: ", question.timeout_seconds) else {
                    return Answer::timeout();
                };
                let response = response.trim();
                match Self::find_option(response, &question.options) {
                    Some(option) => Answer::selected(option),
                    // Unrecognized input falls back to the first option
                    None => match question.options.first() {
                        Some(first) => Answer::selected(first.clone()),
                        None => Answer::skipped(),
                    },
                }
            }
            QuestionType::YesNo | QuestionType::Confirmation => {
                let Some(response) = self.read_line("[Y/N]: ", question.timeout_seconds) else {
                    return Answer::timeout();
                };
                let normalized = response.trim().to_uppercase();
                if normalized == "Y" || normalized == "YES" {
                    Answer::text_answer("yes")
                } else {
                    Answer::text_answer("no")
                }
            }
            QuestionType::Freeform => {
                let Some(response) = self.read_line("> ", question.timeout_seconds) else {
                    return Answer::timeout();
                };
                Answer::text_answer(response.trim())
            }
        }
    }
}
