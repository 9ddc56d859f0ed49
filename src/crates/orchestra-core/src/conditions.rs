//! Edge condition language
//!
//! A condition is one or more clauses joined by `&&`. Each clause is
//! `<key> <op> <literal>` where the key is `outcome`, `preferred_label`,
//! or `context.<dotted-name>`, the operator is `=` or `!=`, and the
//! literal is a bareword or a quoted string. The empty expression is true.

use thiserror::Error;

use crate::model::{Context, Outcome};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid condition syntax: {0}")]
pub struct ConditionParseError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Eq,
    Neq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    key: String,
    op: Op,
    literal: String,
}

/// Check a condition expression for syntax errors without evaluating it
///
/// Parsing is separated from evaluation so validation can reject bad
/// expressions at compile time, before the pipeline runs.
pub fn validate_condition(expr: &str) -> Result<(), ConditionParseError> {
    parse_condition(expr).map(|_| ())
}

fn parse_condition(expr: &str) -> Result<Vec<Clause>, ConditionParseError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(Vec::new());
    }

    expr.split("&&").map(|part| parse_clause(part.trim())).collect()
}

fn parse_clause(clause: &str) -> Result<Clause, ConditionParseError> {
    if clause.is_empty() {
        return Err(ConditionParseError("empty clause".to_string()));
    }

    // `!=` must be checked before `=`
    let (key, op, rest) = if let Some((k, v)) = clause.split_once("!=") {
        (k, Op::Neq, v)
    } else if let Some((k, v)) = clause.split_once('=') {
        (k, Op::Eq, v)
    } else {
        return Err(ConditionParseError(format!(
            "expected '=' or '!=' in clause '{clause}'"
        )));
    };

    let key = key.trim();
    if !(key == "outcome" || key == "preferred_label" || key.starts_with("context.")) {
        return Err(ConditionParseError(format!("unknown key '{key}'")));
    }
    if key == "context." {
        return Err(ConditionParseError("empty context key".to_string()));
    }

    let literal = parse_literal(rest.trim())?;

    Ok(Clause {
        key: key.to_string(),
        op,
        literal,
    })
}

fn parse_literal(raw: &str) -> Result<String, ConditionParseError> {
    if raw.is_empty() {
        return Err(ConditionParseError("missing literal".to_string()));
    }
    if let Some(stripped) = raw.strip_prefix('"') {
        let Some(inner) = stripped.strip_suffix('"') else {
            return Err(ConditionParseError(format!("unterminated string '{raw}'")));
        };
        return Ok(inner.to_string());
    }
    // Barewords: a single token, no embedded whitespace
    if raw.split_whitespace().count() != 1 {
        return Err(ConditionParseError(format!("malformed literal '{raw}'")));
    }
    Ok(raw.to_string())
}

/// Evaluate a condition against a stage outcome and the current context
///
/// Evaluation is short-circuit left-to-right, though it is pure, so order
/// does not affect the result.
pub fn evaluate_condition(
    expr: &str,
    outcome: &Outcome,
    context: &Context,
) -> Result<bool, ConditionParseError> {
    let clauses = parse_condition(expr)?;
    for clause in &clauses {
        if !evaluate_clause(clause, outcome, context) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_clause(clause: &Clause, outcome: &Outcome, context: &Context) -> bool {
    let actual = resolve_key(&clause.key, outcome, context);
    match clause.op {
        Op::Eq => actual == clause.literal,
        Op::Neq => actual != clause.literal,
    }
}

fn resolve_key(key: &str, outcome: &Outcome, context: &Context) -> String {
    if key == "outcome" {
        outcome.status.as_str().to_lowercase()
    } else if key == "preferred_label" {
        outcome.preferred_label.to_lowercase()
    } else if let Some(context_key) = key.strip_prefix("context.") {
        context.get_str(context_key)
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutcomeStatus;

    fn success() -> Outcome {
        Outcome::new(OutcomeStatus::Success)
    }

    #[test]
    fn test_empty_condition_is_true() {
        let ctx = Context::new();
        assert!(evaluate_condition("", &success(), &ctx).unwrap());
        assert!(evaluate_condition("   ", &success(), &ctx).unwrap());
    }

    #[test]
    fn test_outcome_equality() {
        let ctx = Context::new();
        assert!(evaluate_condition("outcome = success", &success(), &ctx).unwrap());
        assert!(!evaluate_condition("outcome = fail", &success(), &ctx).unwrap());
        assert!(evaluate_condition("outcome != fail", &success(), &ctx).unwrap());
    }

    #[test]
    fn test_context_lookup() {
        let mut ctx = Context::new();
        ctx.set("critic.verdict", "approved");

        assert!(evaluate_condition("context.critic.verdict = approved", &success(), &ctx).unwrap());
        assert!(evaluate_condition("context.missing = \"\"", &success(), &ctx).unwrap());
    }

    #[test]
    fn test_conjunction() {
        let mut ctx = Context::new();
        ctx.set("kind", "docs");

        assert!(
            evaluate_condition("outcome = success && context.kind = docs", &success(), &ctx)
                .unwrap()
        );
        assert!(
            !evaluate_condition("outcome = success && context.kind = code", &success(), &ctx)
                .unwrap()
        );
    }

    #[test]
    fn test_quoted_literal() {
        let mut ctx = Context::new();
        ctx.set("msg", "two words");
        assert!(evaluate_condition("context.msg = \"two words\"", &success(), &ctx).unwrap());
    }

    #[test]
    fn test_preferred_label_lowercased() {
        let mut outcome = success();
        outcome.preferred_label = "Approve".to_string();
        let ctx = Context::new();
        assert!(evaluate_condition("preferred_label = approve", &outcome, &ctx).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(validate_condition("outcome success").is_err());
        assert!(validate_condition("bogus_key = x").is_err());
        assert!(validate_condition("outcome = ").is_err());
        assert!(validate_condition("context. = x").is_err());
        assert!(validate_condition("outcome = \"unterminated").is_err());
    }
}
