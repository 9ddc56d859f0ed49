//! Graph transforms applied between parsing and execution
//!
//! Variable expansion substitutes `$goal` into prompts and labels; the
//! model stylesheet assigns model attributes to stages via CSS-like
//! selectors. Both run before the engine sees the graph.

use serde_json::Value as JsonValue;

use crate::model::PipelineGraph;

/// Replace `$goal` in stage prompts and labels with the graph goal
pub fn expand_variables(mut graph: PipelineGraph) -> PipelineGraph {
    let goal = graph.goal();
    if goal.is_empty() {
        return graph;
    }
    for stage in graph.stages.values_mut() {
        stage.prompt = stage.prompt.replace("$goal", &goal);
        stage.label = stage.label.replace("$goal", &goal);
    }
    graph
}

/// Stylesheet properties a rule may assign
const STYLESHEET_PROPERTIES: [&str; 3] = ["llm_model", "llm_provider", "reasoning_effort"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Universal,
    Class(String),
    Id(String),
}

impl Selector {
    fn specificity(&self) -> u8 {
        match self {
            Self::Id(_) => 3,
            Self::Class(_) => 2,
            Self::Universal => 1,
        }
    }

    fn matches(&self, stage_id: &str, classes: &[String]) -> bool {
        match self {
            Self::Universal => true,
            Self::Id(id) => id == stage_id,
            Self::Class(class) => classes.iter().any(|c| c == class),
        }
    }
}

#[derive(Debug, Clone)]
struct StyleRule {
    selector: Selector,
    properties: Vec<(String, String)>,
}

fn parse_stylesheet(text: &str) -> Vec<StyleRule> {
    let mut rules = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        let selector_str = rest[..open].trim();
        let Some(close) = rest[open..].find('}') else { break };
        let body = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let selector = if selector_str == "*" {
            Selector::Universal
        } else if let Some(id) = selector_str.strip_prefix('#') {
            Selector::Id(id.to_string())
        } else if let Some(class) = selector_str.strip_prefix('.') {
            Selector::Class(class.to_string())
        } else {
            continue;
        };

        let properties: Vec<(String, String)> = body
            .split(';')
            .filter_map(|decl| {
                let (name, value) = decl.split_once(':')?;
                let name = name.trim().to_string();
                if !STYLESHEET_PROPERTIES.contains(&name.as_str()) {
                    return None;
                }
                Some((name, value.trim().trim_matches('"').to_string()))
            })
            .collect();

        rules.push(StyleRule { selector, properties });
    }

    rules
}

/// Apply the graph's `model_stylesheet` attribute to its stages
///
/// Rules apply in specificity order (id > class > universal); the first
/// rule to set a property wins and explicit stage attributes always win.
pub fn apply_model_stylesheet(mut graph: PipelineGraph) -> PipelineGraph {
    let stylesheet = graph.graph_attr_str("model_stylesheet");
    if stylesheet.is_empty() {
        return graph;
    }

    let mut rules = parse_stylesheet(&stylesheet);
    rules.sort_by(|a, b| b.selector.specificity().cmp(&a.selector.specificity()));

    for stage in graph.stages.values_mut() {
        let classes: Vec<String> = stage
            .attr_str("class")
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        for rule in &rules {
            if !rule.selector.matches(&stage.id, &classes) {
                continue;
            }
            for (name, value) in &rule.properties {
                stage
                    .attributes
                    .entry(name.clone())
                    .or_insert_with(|| JsonValue::String(value.clone()));
            }
        }
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Shape, Stage};

    #[test]
    fn test_expand_goal() {
        let mut g = PipelineGraph::new("g");
        g.graph_attributes.insert("goal".into(), "ship v2".into());
        g.add_stage(Stage::new("plan", Shape::Codergen).with_prompt("Plan: $goal"));

        let g = expand_variables(g);
        assert_eq!(g.get_stage("plan").unwrap().prompt, "Plan: ship v2");
    }

    fn styled_graph(stylesheet: &str) -> PipelineGraph {
        let mut g = PipelineGraph::new("g");
        g.graph_attributes.insert("model_stylesheet".into(), stylesheet.into());
        g.add_stage(Stage::new("review", Shape::Codergen).with_attribute("class", "critic"));
        g.add_stage(Stage::new("build", Shape::Codergen));
        g
    }

    #[test]
    fn test_universal_rule() {
        let g = apply_model_stylesheet(styled_graph("* { llm_model: cheap; }"));
        assert_eq!(g.get_stage("build").unwrap().attr_str("llm_model"), "cheap");
        assert_eq!(g.get_stage("review").unwrap().attr_str("llm_model"), "cheap");
    }

    #[test]
    fn test_specificity_id_over_class_over_universal() {
        let stylesheet = r#"
* { llm_model: cheap; }
.critic { llm_model: smart; }
#review { llm_model: best; }
"#;
        let g = apply_model_stylesheet(styled_graph(stylesheet));
        assert_eq!(g.get_stage("review").unwrap().attr_str("llm_model"), "best");
        assert_eq!(g.get_stage("build").unwrap().attr_str("llm_model"), "cheap");
    }

    #[test]
    fn test_explicit_attribute_wins() {
        let mut g = styled_graph("* { llm_model: cheap; }");
        g.stages.get_mut("build").unwrap().attributes.insert("llm_model".into(), "pinned".into());
        let g = apply_model_stylesheet(g);
        assert_eq!(g.get_stage("build").unwrap().attr_str("llm_model"), "pinned");
    }

    #[test]
    fn test_unknown_properties_ignored() {
        let g = apply_model_stylesheet(styled_graph("* { color: red; llm_provider: anthropic; }"));
        let build = g.get_stage("build").unwrap();
        assert_eq!(build.attr_str("llm_provider"), "anthropic");
        assert_eq!(build.attr_str("color"), "");
    }
}
