//! Execution context carried between stages
//!
//! A context is an ordered map from dotted string keys to JSON values.
//! Dotted keys are flattened for storage (`tool.output`) but expand into a
//! nested view when used as template variables (`{{ tool.output }}`).

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

/// Mutable string-keyed state owned by a single runner at a time
///
/// Branch runners receive a [`Context::clone`]d copy; writes in one branch
/// are invisible to peers and to the parent until the fan-in publishes them.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: BTreeMap<String, JsonValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value under a flat dotted key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a value by flat dotted key
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Get a value as a string, empty when absent or null
    pub fn get_str(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => String::new(),
            Some(v) => v.to_string(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Plain-value serialization of the flat map, used for checkpoints
    pub fn snapshot(&self) -> JsonMap<String, JsonValue> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Restore a context from a checkpoint snapshot
    pub fn from_snapshot(snapshot: &JsonMap<String, JsonValue>) -> Self {
        let mut ctx = Self::new();
        for (k, v) in snapshot {
            ctx.set(k.clone(), v.clone());
        }
        ctx
    }

    /// Nested view for template rendering
    ///
    /// `{"tool.output": "x", "outcome": "ok"}` becomes
    /// `{"tool": {"output": "x"}, "outcome": "ok"}`. When a dotted key
    /// collides with a scalar of the same prefix the nested map wins.
    pub fn nested(&self) -> JsonMap<String, JsonValue> {
        nest_dotted_keys(&self.snapshot())
    }
}

/// Convert flat dot-notation keys into nested JSON maps
pub fn nest_dotted_keys(flat: &JsonMap<String, JsonValue>) -> JsonMap<String, JsonValue> {
    let mut nested = JsonMap::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() == 1 {
            // Don't clobber a sub-map already built from dotted siblings
            if !matches!(nested.get(key.as_str()), Some(JsonValue::Object(_))) {
                nested.insert(key.clone(), value.clone());
            }
            continue;
        }
        let mut cursor = &mut nested;
        for part in &parts[..parts.len() - 1] {
            let entry = cursor
                .entry(part.to_string())
                .or_insert_with(|| JsonValue::Object(JsonMap::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(JsonMap::new());
            }
            cursor = entry.as_object_mut().expect("just ensured object");
        }
        cursor.insert(parts[parts.len() - 1].to_string(), value.clone());
    }
    nested
}
