//! Stage outcomes
//!
//! Handlers return an [`Outcome`] directly instead of raising errors;
//! transient backend failures are already `fail` outcomes by the time they
//! reach the runner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Result status of one stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Retry => "retry",
            Self::Fail => "fail",
        }
    }

    /// Whether the stage counts as satisfied for goal gates and joins
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial_success" => Some(Self::PartialSuccess),
            "retry" => Some(Self::Retry),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one stage: status plus the data the runner folds back into
/// the context and the edge selector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,

    /// Free-form notes, typically the backend response text
    #[serde(default)]
    pub notes: String,

    /// Context keys the runner applies after the stage completes
    #[serde(default)]
    pub context_updates: BTreeMap<String, JsonValue>,

    /// Stage ids that override edge selection; the first existing target wins
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,

    /// Why the stage failed, when it did
    #[serde(default)]
    pub failure_reason: String,

    /// Label preference consulted by `preferred_label` conditions
    #[serde(default)]
    pub preferred_label: String,
}

impl Outcome {
    pub fn new(status: OutcomeStatus) -> Self {
        Self {
            status,
            notes: String::new(),
            context_updates: BTreeMap::new(),
            suggested_next_ids: Vec::new(),
            failure_reason: String::new(),
            preferred_label: String::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(OutcomeStatus::Success)
    }

    pub fn partial_success() -> Self {
        Self::new(OutcomeStatus::PartialSuccess)
    }

    pub fn retry() -> Self {
        Self::new(OutcomeStatus::Retry)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: reason.into(),
            ..Self::new(OutcomeStatus::Fail)
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_update(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.context_updates.insert(key.into(), value.into());
        self
    }

    pub fn with_suggested_next(mut self, id: impl Into<String>) -> Self {
        self.suggested_next_ids.push(id.into());
        self
    }

    /// Numeric score from context updates, used by fan-in selection
    pub fn score(&self) -> f64 {
        self.context_updates
            .get("score")
            .and_then(|v| match v {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(OutcomeStatus::Success.is_ok());
        assert!(OutcomeStatus::PartialSuccess.is_ok());
        assert!(!OutcomeStatus::Retry.is_ok());
        assert!(!OutcomeStatus::Fail.is_ok());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            OutcomeStatus::Success,
            OutcomeStatus::PartialSuccess,
            OutcomeStatus::Retry,
            OutcomeStatus::Fail,
        ] {
            assert_eq!(OutcomeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutcomeStatus::parse("bogus"), None);
    }

    #[test]
    fn test_score_extraction() {
        let outcome = Outcome::success().with_update("score", 0.9);
        assert!((outcome.score() - 0.9).abs() < f64::EPSILON);

        let outcome = Outcome::success().with_update("score", "0.5");
        assert!((outcome.score() - 0.5).abs() < f64::EPSILON);

        assert_eq!(Outcome::success().score(), 0.0);
    }

    #[test]
    fn test_serde_round_trip() {
        let outcome = Outcome::fail("backend unreachable")
            .with_notes("attempt 3 of 3")
            .with_update("score", 0.1);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "fail");

        let back: Outcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, OutcomeStatus::Fail);
        assert_eq!(back.failure_reason, "backend unreachable");
    }
}
