//! Fan-in join policies
//!
//! Combines branch outcomes at a fan-in stage. Branch results arrive as a
//! map from branch id to [`Outcome`]; the policy decides whether the join
//! is satisfied, what the combined status is, and which results are
//! selected for downstream prompting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::model::{Outcome, OutcomeStatus};

/// How a fan-in combines its branch outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    WaitAll,
    FirstSuccess,
    KOfN,
    Quorum,
}

impl JoinPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wait_all" => Some(Self::WaitAll),
            "first_success" => Some(Self::FirstSuccess),
            "k_of_n" => Some(Self::KOfN),
            "quorum" => Some(Self::Quorum),
            _ => None,
        }
    }
}

/// Policy parameters read from fan-in stage attributes
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinParams {
    /// Required successes for `k_of_n` (default 1)
    pub k: Option<u32>,
    /// Required success percentage for `quorum` (default 50)
    pub quorum_percent: Option<f64>,
}

/// Result of evaluating a join policy
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub satisfied: bool,
    pub status: OutcomeStatus,
    /// Branch id → outcome pairs the policy selected
    pub selected_results: Vec<(String, Outcome)>,
    pub failure_reason: String,
}

impl JoinResult {
    fn unsatisfied(reason: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            status: OutcomeStatus::Fail,
            selected_results: Vec::new(),
            failure_reason: reason.into(),
        }
    }
}

/// Evaluate a join policy over branch results
pub fn evaluate_join(
    policy: JoinPolicy,
    results: &BTreeMap<String, Outcome>,
    params: JoinParams,
) -> JoinResult {
    match policy {
        JoinPolicy::WaitAll => eval_wait_all(results),
        JoinPolicy::FirstSuccess => eval_first_success(results),
        JoinPolicy::KOfN => eval_k_of_n(results, params.k.unwrap_or(1)),
        JoinPolicy::Quorum => eval_quorum(results, params.quorum_percent.unwrap_or(50.0)),
    }
}

fn eval_wait_all(results: &BTreeMap<String, Outcome>) -> JoinResult {
    if results.is_empty() {
        return JoinResult::unsatisfied("No branch results");
    }

    let all_success = results.values().all(|o| o.status == OutcomeStatus::Success);
    let all_fail = results.values().all(|o| o.status == OutcomeStatus::Fail);
    let status = if all_success {
        OutcomeStatus::Success
    } else if all_fail {
        OutcomeStatus::Fail
    } else {
        OutcomeStatus::PartialSuccess
    };

    JoinResult {
        satisfied: true,
        status,
        selected_results: results.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        failure_reason: String::new(),
    }
}

fn eval_first_success(results: &BTreeMap<String, Outcome>) -> JoinResult {
    for (branch_id, outcome) in results {
        if outcome.status == OutcomeStatus::Success {
            return JoinResult {
                satisfied: true,
                status: OutcomeStatus::Success,
                selected_results: vec![(branch_id.clone(), outcome.clone())],
                failure_reason: String::new(),
            };
        }
    }
    JoinResult::unsatisfied("No successful branch found")
}

fn successful(results: &BTreeMap<String, Outcome>) -> Vec<(String, Outcome)> {
    results
        .iter()
        .filter(|(_, o)| o.status.is_ok())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn eval_k_of_n(results: &BTreeMap<String, Outcome>, k: u32) -> JoinResult {
    let selected = successful(results);
    if selected.len() as u32 >= k {
        JoinResult {
            satisfied: true,
            status: OutcomeStatus::Success,
            selected_results: selected,
            failure_reason: String::new(),
        }
    } else {
        JoinResult::unsatisfied(format!(
            "Only {} of {} required branches succeeded",
            selected.len(),
            k
        ))
    }
}

fn eval_quorum(results: &BTreeMap<String, Outcome>, quorum_percent: f64) -> JoinResult {
    if results.is_empty() {
        return JoinResult::unsatisfied("No branch results");
    }
    let selected = successful(results);
    let fraction = (selected.len() as f64 / results.len() as f64) * 100.0;
    if fraction >= quorum_percent {
        JoinResult {
            satisfied: true,
            status: OutcomeStatus::Success,
            selected_results: selected,
            failure_reason: String::new(),
        }
    } else {
        JoinResult::unsatisfied(format!(
            "Quorum not met: {fraction:.0}% < {quorum_percent}%"
        ))
    }
}

/// Parse a stored branch result back into an [`Outcome`]
///
/// Branch results live in the parent context as JSON; tolerate both the
/// full serialized outcome and a bare status string.
pub fn parse_branch_outcome(value: &JsonValue) -> Option<Outcome> {
    if let Ok(outcome) = serde_json::from_value::<Outcome>(value.clone()) {
        return Some(outcome);
    }
    value
        .as_str()
        .and_then(OutcomeStatus::parse)
        .map(Outcome::new)
}
