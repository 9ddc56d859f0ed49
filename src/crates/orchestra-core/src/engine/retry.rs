//! Retry engine with jittered exponential backoff
//!
//! A stage's policy is derived from its `max_retries` attribute
//! (`max_attempts = max_retries + 1`) and a named backoff preset. Between
//! attempts the engine sleeps for
//! `min(initial_delay_ms * backoff_factor^(attempt-1), max_delay_ms)`,
//! multiplied by uniform(0.5, 1.5) when jitter is on.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::events::{Event, EventDispatcher};
use crate::handlers::NodeHandler;
use crate::model::{Context, Outcome, OutcomeStatus, PipelineGraph, Stage};

/// Backoff curve configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

/// Per-stage retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Named backoff presets selectable via the `backoff_policy` attribute
pub fn preset_policy(name: &str) -> RetryPolicy {
    match name {
        "none" => RetryPolicy { max_attempts: 1, backoff: BackoffConfig::default() },
        "aggressive" => RetryPolicy {
            max_attempts: 5,
            backoff: BackoffConfig { initial_delay_ms: 500, backoff_factor: 2.0, ..BackoffConfig::default() },
        },
        "linear" => RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig { initial_delay_ms: 500, backoff_factor: 1.0, ..BackoffConfig::default() },
        },
        "patient" => RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig { initial_delay_ms: 2_000, backoff_factor: 3.0, ..BackoffConfig::default() },
        },
        // "standard" and anything unrecognized
        _ => RetryPolicy {
            max_attempts: 5,
            backoff: BackoffConfig { initial_delay_ms: 200, backoff_factor: 2.0, ..BackoffConfig::default() },
        },
    }
}

/// Derive the effective policy for a stage
///
/// `max_retries` comes from the stage, falling back to the graph's
/// `default_max_retry`; the backoff curve comes from the named preset.
pub fn build_retry_policy(stage: &Stage, graph: &PipelineGraph) -> RetryPolicy {
    let max_retries = stage
        .attr_i64("max_retries")
        .or_else(|| graph.graph_attr_i64("default_max_retry"))
        .unwrap_or(0)
        .max(0) as u32;

    let backoff_name = stage.attr_str("backoff_policy");
    let preset = if backoff_name.is_empty() {
        preset_policy("standard")
    } else {
        preset_policy(&backoff_name)
    };

    RetryPolicy {
        max_attempts: max_retries + 1,
        backoff: preset.backoff,
    }
}

/// Delay before the retry following `attempt` (1-indexed), in milliseconds
pub fn calculate_delay_ms(config: &BackoffConfig, attempt: u32) -> u64 {
    let base = config.initial_delay_ms as f64 * config.backoff_factor.powi(attempt as i32 - 1);
    let capped = base.min(config.max_delay_ms as f64);
    let final_delay = if config.jitter {
        capped * rand::thread_rng().gen_range(0.5..=1.5)
    } else {
        capped
    };
    final_delay as u64
}

/// Sleeps between retry attempts; tests substitute a recording no-op
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays without sleeping
#[derive(Default)]
pub struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Execute one handler under a retry policy
///
/// `success`/`partial_success` return immediately. `fail` and `retry`
/// re-invoke up to `max_attempts`; exhausted `retry` becomes
/// `partial_success` when the stage sets `allow_partial`, `fail` otherwise.
pub async fn execute_with_retry(
    stage: &Stage,
    handler: &dyn NodeHandler,
    context: &Context,
    graph: &PipelineGraph,
    policy: &RetryPolicy,
    emitter: &EventDispatcher,
    sleeper: &dyn Sleeper,
) -> Outcome {
    let allow_partial = stage.attr_bool("allow_partial");

    for attempt in 1..=policy.max_attempts {
        let outcome = handler.handle(stage, context, graph).await;

        match outcome.status {
            OutcomeStatus::Success | OutcomeStatus::PartialSuccess => return outcome,
            OutcomeStatus::Fail => {
                if attempt < policy.max_attempts {
                    back_off(stage, policy, attempt, emitter, sleeper).await;
                    continue;
                }
                return outcome;
            }
            OutcomeStatus::Retry => {
                if attempt < policy.max_attempts {
                    back_off(stage, policy, attempt, emitter, sleeper).await;
                    continue;
                }
                if allow_partial {
                    return Outcome::partial_success()
                        .with_notes("retries exhausted, partial accepted");
                }
                return Outcome::fail("max retries exceeded");
            }
        }
    }

    Outcome::fail("max retries exceeded")
}

async fn back_off(
    stage: &Stage,
    policy: &RetryPolicy,
    attempt: u32,
    emitter: &EventDispatcher,
    sleeper: &dyn Sleeper,
) {
    let delay_ms = calculate_delay_ms(&policy.backoff, attempt);
    emitter.emit(Event::StageRetrying {
        node_id: stage.id.clone(),
        attempt,
        max_attempts: policy.max_attempts,
        delay_ms,
    });
    sleeper.sleep(Duration::from_millis(delay_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Shape;

    #[test]
    fn test_presets() {
        assert_eq!(preset_policy("none").max_attempts, 1);
        assert_eq!(preset_policy("standard").max_attempts, 5);
        assert_eq!(preset_policy("standard").backoff.initial_delay_ms, 200);
        assert_eq!(preset_policy("aggressive").backoff.initial_delay_ms, 500);
        assert_eq!(preset_policy("linear").backoff.backoff_factor, 1.0);
        assert_eq!(preset_policy("patient").backoff.backoff_factor, 3.0);
        // Unknown names fall back to standard
        assert_eq!(preset_policy("bogus"), preset_policy("standard"));
    }

    #[test]
    fn test_build_policy_from_stage_attribute() {
        let graph = PipelineGraph::new("g");
        let stage = Stage::new("flaky", Shape::Codergen).with_attribute("max_retries", 2);
        let policy = build_retry_policy(&stage, &graph);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_build_policy_graph_fallback() {
        let mut graph = PipelineGraph::new("g");
        graph.graph_attributes.insert("default_max_retry".into(), 1.into());
        let stage = Stage::new("s", Shape::Codergen);
        assert_eq!(build_retry_policy(&stage, &graph).max_attempts, 2);
    }

    #[test]
    fn test_delay_exponential_growth() {
        let config = BackoffConfig {
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: false,
        };
        assert_eq!(calculate_delay_ms(&config, 1), 100);
        assert_eq!(calculate_delay_ms(&config, 2), 200);
        assert_eq!(calculate_delay_ms(&config, 3), 400);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = BackoffConfig {
            initial_delay_ms: 10_000,
            backoff_factor: 2.0,
            max_delay_ms: 15_000,
            jitter: false,
        };
        assert_eq!(calculate_delay_ms(&config, 4), 15_000);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = BackoffConfig {
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        };
        for _ in 0..20 {
            let delay = calculate_delay_ms(&config, 2);
            assert!((1_000..=3_000).contains(&delay), "delay {delay} out of jitter range");
        }
    }
}
