use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public types — Event
// ---------------------------------------------------------------------------

/// An incoming event: an id plus an attribute bag. Attribute values may be
/// strings, numbers, booleans, arrays, or nested maps (flattened to dotted
/// uppercase paths before dictionary lookup). Owned by the caller and treated
/// as immutable for the duration of an evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: None,
            attributes: serde_json::Map::new(),
        }
    }

    /// Builder-style attribute setter, mainly for tests and benches.
    pub fn attr(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Public types — evaluation result
// ---------------------------------------------------------------------------

/// One emitted match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRule {
    pub combination_id: u32,
    pub rule_code: String,
    pub priority: i32,
    pub description: String,
}

/// Result of evaluating one event. Match order is deterministic: ascending
/// combination id, then compile-time binding order within a combination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub event_id: String,
    pub matched_rules: Vec<MatchedRule>,
    pub evaluation_time_nanos: u64,
    pub predicates_evaluated: u64,
    pub rules_matched: u32,
}

impl MatchResult {
    /// Rule codes of the emitted matches, in emission order.
    pub fn codes(&self) -> Vec<&str> {
        self.matched_rules.iter().map(|m| m.rule_code.as_str()).collect()
    }
}
