//! The Orchestra type bundle
//!
//! Turn payloads are msgpack maps keyed by numeric field tags. The bundle
//! published to the store registry maps each (type id, version) to its
//! field table so readers can decode without the engine present. Versions
//! only ever add optional fields; existing tags never change meaning.

use rmpv::Value as MpValue;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

pub const BUNDLE_ID: &str = "dev.orchestra.v3";

/// Field definition: tag, name, wire type, optional
type FieldDef = (u32, &'static str, &'static str, bool);

/// Every (type id, version) the observer writes, with its field table
const TYPE_TABLE: &[(&str, u32, &[FieldDef])] = &[
    (
        "dev.orchestra.PipelineLifecycle",
        1,
        &[
            (1, "pipeline_name", "string", false),
            (2, "goal", "string", true),
            (3, "status", "string", false),
            (4, "duration_ms", "u64", true),
            (5, "error", "string", true),
            (6, "session_display_id", "string", true),
        ],
    ),
    (
        "dev.orchestra.PipelineLifecycle",
        2,
        &[
            (1, "pipeline_name", "string", false),
            (2, "goal", "string", true),
            (3, "status", "string", false),
            (4, "duration_ms", "u64", true),
            (5, "error", "string", true),
            (6, "session_display_id", "string", true),
            (7, "dot_file_path", "string", true),
            (8, "graph_hash", "string", true),
        ],
    ),
    (
        "dev.orchestra.NodeExecution",
        1,
        &[
            (1, "node_id", "string", false),
            (2, "handler_type", "string", false),
            (3, "status", "string", false),
            (4, "prompt", "string", true),
            (5, "response", "string", true),
            (6, "outcome", "string", true),
            (7, "duration_ms", "u64", true),
        ],
    ),
    (
        "dev.orchestra.Checkpoint",
        3,
        &[
            (1, "current_node", "string", false),
            (2, "completed_nodes", "array", false),
            (3, "context_snapshot", "map", false),
            (4, "retry_counters", "map", true),
            (5, "next_node_id", "string", true),
            (6, "visited_outcomes", "map", true),
            (7, "reroute_count", "u64", true),
            (8, "workspace_snapshot", "map", true),
        ],
    ),
    (
        "dev.orchestra.AgentTurn",
        2,
        &[
            (1, "turn_number", "u64", false),
            (2, "node_id", "string", false),
            (3, "model", "string", true),
            (4, "provider", "string", true),
            (5, "messages", "string", true),
            (6, "tool_calls", "string", true),
            (7, "files_written", "array", true),
            (8, "token_usage", "map", true),
            (9, "agent_state", "string", true),
            (10, "git_sha", "string", true),
            (11, "commit_message", "string", true),
        ],
    ),
    (
        "dev.orchestra.ParallelExecution",
        1,
        &[
            (1, "node_id", "string", false),
            (2, "branch_count", "u64", false),
            (3, "branch_contexts", "array", true),
            (4, "success_count", "u64", true),
            (5, "failure_count", "u64", true),
            (6, "duration_ms", "u64", true),
            (7, "status", "string", true),
        ],
    ),
    (
        "dev.orchestra.WorktreeEvent",
        1,
        &[
            (1, "repo_name", "string", false),
            (2, "branch_id", "string", true),
            (3, "worktree_path", "string", true),
            (4, "worktree_branch", "string", true),
            (5, "branch_ids", "array", true),
            (6, "merged_sha", "string", true),
            (7, "status", "string", false),
        ],
    ),
];

fn field_table(type_id: &str, type_version: u32) -> Option<&'static [FieldDef]> {
    TYPE_TABLE
        .iter()
        .find(|(id, version, _)| *id == type_id && *version == type_version)
        .map(|(_, _, fields)| *fields)
}

/// The registry bundle document, published once at startup
pub fn bundle_document() -> JsonValue {
    let mut types = JsonMap::new();
    for (type_id, version, fields) in TYPE_TABLE {
        let fields_json: JsonMap<String, JsonValue> = fields
            .iter()
            .map(|(tag, name, wire_type, optional)| {
                let mut field = json!({"name": name, "type": wire_type});
                if *optional {
                    field["optional"] = json!(true);
                }
                (tag.to_string(), field)
            })
            .collect();

        let entry = types
            .entry(type_id.to_string())
            .or_insert_with(|| json!({"versions": {}}));
        entry["versions"][version.to_string()] = json!({"fields": fields_json});
    }

    json!({
        "registry_version": 1,
        "bundle_id": BUNDLE_ID,
        "types": types,
    })
}

fn json_to_mp(value: &JsonValue) -> MpValue {
    match value {
        JsonValue::Null => MpValue::Nil,
        JsonValue::Bool(b) => MpValue::from(*b),
        JsonValue::Number(n) => {
            if let Some(u) = n.as_u64() {
                MpValue::from(u)
            } else if let Some(i) = n.as_i64() {
                MpValue::from(i)
            } else {
                MpValue::from(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => MpValue::from(s.as_str()),
        JsonValue::Array(items) => MpValue::Array(items.iter().map(json_to_mp).collect()),
        JsonValue::Object(map) => MpValue::Map(
            map.iter()
                .map(|(k, v)| (MpValue::from(k.as_str()), json_to_mp(v)))
                .collect(),
        ),
    }
}

/// Re-key a named payload by numeric field tags for wire encoding
///
/// Fields the table does not know are dropped; the bundle is the schema.
pub fn to_tagged(type_id: &str, type_version: u32, data: &JsonMap<String, JsonValue>) -> MpValue {
    let Some(fields) = field_table(type_id, type_version) else {
        return json_to_mp(&JsonValue::Object(data.clone()));
    };
    let entries: Vec<(MpValue, MpValue)> = fields
        .iter()
        .filter_map(|(tag, name, _, _)| {
            data.get(*name)
                .map(|value| (MpValue::from(*tag as u64), json_to_mp(value)))
        })
        .collect();
    MpValue::Map(entries)
}

/// Re-key a tagged payload back to field names (reader side)
pub fn from_tagged(
    type_id: &str,
    type_version: u32,
    data: &MpValue,
) -> JsonMap<String, JsonValue> {
    let mut out = JsonMap::new();
    let Some(fields) = field_table(type_id, type_version) else {
        return out;
    };
    let MpValue::Map(entries) = data else { return out };

    for (key, value) in entries {
        let Some(tag) = key.as_u64() else { continue };
        if let Some((_, name, _, _)) = fields.iter().find(|(t, _, _, _)| *t as u64 == tag) {
            if let Ok(json) = serde_json::to_value(value) {
                out.insert(name.to_string(), json);
            }
        }
    }
    out
}
