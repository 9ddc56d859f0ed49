//! Fan-out graph analysis
//!
//! Finds the fan-in stage that joins a fan-out's branches and extracts
//! each branch as a self-contained sub-graph the parallel handler can run
//! with a fresh runner.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{OrchestraError, Result};
use crate::model::{Edge, PipelineGraph, Shape, Stage};

/// One extracted parallel branch
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch id; the id of the fan-out successor the branch starts at
    pub branch_id: String,
    pub first_node_id: String,
    /// Self-contained graph with synthetic start and exit stages
    pub subgraph: PipelineGraph,
}

/// Find the unique fan-in joining all branches of a fan-out
///
/// BFS from each successor collects every fan-in-shaped stage reachable
/// from that branch; the intersection across successors is the candidate
/// set and the byte-order smallest id wins (deterministic when a graph has
/// several valid joins).
pub fn find_fan_in(graph: &PipelineGraph, fan_out_id: &str) -> Option<String> {
    let outgoing = graph.outgoing_edges(fan_out_id);
    if outgoing.is_empty() {
        return None;
    }

    let mut common: Option<BTreeSet<String>> = None;
    for edge in outgoing {
        let mut reachable: BTreeSet<String> = BTreeSet::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([edge.to_id.clone()]);
        while let Some(nid) = queue.pop_front() {
            if !visited.insert(nid.clone()) {
                continue;
            }
            if let Some(stage) = graph.get_stage(&nid) {
                if stage.shape == Shape::ParallelFanIn {
                    reachable.insert(nid);
                    continue;
                }
            }
            for out_edge in graph.outgoing_edges(&nid) {
                queue.push_back(out_edge.to_id.clone());
            }
        }
        common = Some(match common {
            None => reachable,
            Some(prev) => prev.intersection(&reachable).cloned().collect(),
        });
    }

    common.and_then(|set| set.into_iter().next())
}

/// Extract each outgoing branch of a fan-out as a runnable sub-graph
///
/// Every branch is the transitive closure of stages reachable from one
/// fan-out successor without passing through the fan-in, bracketed by a
/// synthetic start stage pointing at the successor and a synthetic exit
/// attached to each terminal frontier stage. A branch that cannot reach
/// the fan-in makes the graph malformed.
pub fn extract_branch_subgraphs(
    graph: &PipelineGraph,
    fan_out_id: &str,
    fan_in_id: &str,
) -> Result<BTreeMap<String, BranchInfo>> {
    let outgoing = graph.outgoing_edges(fan_out_id);
    if outgoing.is_empty() {
        return Err(OrchestraError::Validation(format!(
            "Fan-out stage '{fan_out_id}' has no outgoing edges"
        )));
    }

    let mut branches = BTreeMap::new();

    for edge in outgoing {
        let branch_id = edge.to_id.clone();
        let first_node_id = edge.to_id.clone();

        let mut collected_ids: Vec<String> = Vec::new();
        let mut collected_edges: Vec<Edge> = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([first_node_id.clone()]);

        while let Some(nid) = queue.pop_front() {
            if !visited.insert(nid.clone()) {
                continue;
            }
            if nid == fan_in_id {
                continue;
            }
            collected_ids.push(nid.clone());
            for out_edge in graph.outgoing_edges(&nid) {
                if out_edge.to_id != fan_in_id {
                    collected_edges.push((*out_edge).clone());
                }
                queue.push_back(out_edge.to_id.clone());
            }
        }

        if !visited.contains(fan_in_id) {
            return Err(OrchestraError::Validation(format!(
                "Branch '{branch_id}' does not reach fan-in stage '{fan_in_id}'"
            )));
        }

        let start_id = format!("_start_{branch_id}");
        let exit_id = format!("_exit_{branch_id}");

        let mut subgraph = PipelineGraph::new(format!("branch_{branch_id}"));
        subgraph.add_stage(Stage::new(&start_id, Shape::Start).with_label("start"));
        subgraph.add_stage(Stage::new(&exit_id, Shape::Exit).with_label("exit"));
        for nid in &collected_ids {
            if let Some(original) = graph.get_stage(nid) {
                subgraph.add_stage(original.clone());
            }
        }

        subgraph.add_edge(Edge::new(&start_id, &first_node_id));
        let frontier_sources: BTreeSet<&str> =
            collected_edges.iter().map(|e| e.from_id.as_str()).collect();
        for e in &collected_edges {
            subgraph.add_edge(e.clone());
        }
        for nid in &collected_ids {
            if !frontier_sources.contains(nid.as_str()) {
                subgraph.add_edge(Edge::new(nid, &exit_id));
            }
        }

        branches.insert(
            branch_id.clone(),
            BranchInfo { branch_id, first_node_id, subgraph },
        );
    }

    Ok(branches)
}
