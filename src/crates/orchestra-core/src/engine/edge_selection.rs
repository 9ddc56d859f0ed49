//! Edge selection
//!
//! Given the current stage's outcome and context, picks at most one next
//! stage:
//! 1. A suggested next id whose target stage exists wins outright, even
//!    when no edge points at it (fan-out handlers route to the fan-in
//!    this way).
//! 2. Otherwise collect outgoing edges whose condition holds.
//! 3. Unconditional matches beat conditional ones.
//! 4. Highest weight wins; ties break on `to_id` byte order ascending.

use crate::conditions::evaluate_condition;
use crate::model::{Context, Edge, Outcome, PipelineGraph};

/// Pick the id of the next stage, or `None` when no edge applies
pub fn select_next(
    node_id: &str,
    outcome: &Outcome,
    context: &Context,
    graph: &PipelineGraph,
) -> Option<String> {
    // Handler-suggested routing overrides the edge table; first existing
    // target wins
    for suggested in &outcome.suggested_next_ids {
        if graph.get_stage(suggested).is_some() {
            return Some(suggested.clone());
        }
    }

    let matching: Vec<&Edge> = graph
        .outgoing_edges(node_id)
        .into_iter()
        .filter(|e| evaluate_condition(&e.condition, outcome, context).unwrap_or(false))
        .collect();

    if matching.is_empty() {
        return None;
    }

    let unconditional: Vec<&Edge> = matching
        .iter()
        .copied()
        .filter(|e| e.condition.trim().is_empty())
        .collect();
    let pool = if unconditional.is_empty() { matching } else { unconditional };

    pool.into_iter()
        .min_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.to_id.cmp(&b.to_id)))
        .map(|e| e.to_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Shape, Stage};

    fn graph_with_edges(edges: Vec<Edge>) -> PipelineGraph {
        let mut g = PipelineGraph::new("g");
        g.add_stage(Stage::new("n", Shape::Codergen));
        for e in &edges {
            if g.get_stage(&e.to_id).is_none() {
                g.add_stage(Stage::new(&e.to_id, Shape::Codergen));
            }
        }
        for e in edges {
            g.add_edge(e);
        }
        g
    }

    #[test]
    fn test_suggested_next_id_wins() {
        let g = graph_with_edges(vec![Edge::new("n", "a"), Edge::new("n", "b")]);
        let outcome = Outcome::success().with_suggested_next("b");
        assert_eq!(select_next("n", &outcome, &Context::new(), &g).unwrap(), "b");
    }

    #[test]
    fn test_first_existing_suggestion_wins() {
        let g = graph_with_edges(vec![Edge::new("n", "a"), Edge::new("n", "b")]);
        let mut outcome = Outcome::success();
        outcome.suggested_next_ids = vec!["ghost".into(), "b".into(), "a".into()];
        assert_eq!(select_next("n", &outcome, &Context::new(), &g).unwrap(), "b");
    }

    #[test]
    fn test_suggestion_without_edge_still_routes() {
        let mut g = graph_with_edges(vec![Edge::new("n", "a")]);
        g.add_stage(Stage::new("join", Shape::ParallelFanIn));
        let outcome = Outcome::success().with_suggested_next("join");
        assert_eq!(select_next("n", &outcome, &Context::new(), &g).unwrap(), "join");
    }

    #[test]
    fn test_condition_filtering() {
        let g = graph_with_edges(vec![
            Edge::new("n", "ok").with_condition("outcome = success"),
            Edge::new("n", "bad").with_condition("outcome = fail"),
        ]);
        assert_eq!(
            select_next("n", &Outcome::success(), &Context::new(), &g).unwrap(),
            "ok"
        );
        assert_eq!(
            select_next("n", &Outcome::fail("x"), &Context::new(), &g).unwrap(),
            "bad"
        );
    }

    #[test]
    fn test_unconditional_beats_conditional() {
        let g = graph_with_edges(vec![
            Edge::new("n", "cond").with_condition("outcome = success").with_weight(10),
            Edge::new("n", "plain"),
        ]);
        assert_eq!(
            select_next("n", &Outcome::success(), &Context::new(), &g).unwrap(),
            "plain"
        );
    }

    #[test]
    fn test_weight_then_lexicographic() {
        let g = graph_with_edges(vec![
            Edge::new("n", "zzz").with_weight(5),
            Edge::new("n", "aaa").with_weight(1),
        ]);
        assert_eq!(
            select_next("n", &Outcome::success(), &Context::new(), &g).unwrap(),
            "zzz"
        );

        let g = graph_with_edges(vec![Edge::new("n", "zzz"), Edge::new("n", "aaa")]);
        assert_eq!(
            select_next("n", &Outcome::success(), &Context::new(), &g).unwrap(),
            "aaa"
        );
    }

    #[test]
    fn test_no_matching_edge() {
        let g = graph_with_edges(vec![Edge::new("n", "a").with_condition("outcome = fail")]);
        assert!(select_next("n", &Outcome::success(), &Context::new(), &g).is_none());
    }

    #[test]
    fn test_never_picks_false_condition() {
        let mut ctx = Context::new();
        ctx.set("kind", "docs");
        let g = graph_with_edges(vec![
            Edge::new("n", "a").with_condition("context.kind = code"),
            Edge::new("n", "b").with_condition("context.kind = docs"),
        ]);
        assert_eq!(select_next("n", &Outcome::success(), &ctx, &g).unwrap(), "b");
    }
}
