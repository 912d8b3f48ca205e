use std::collections::HashMap;
use std::sync::atomic::Ordering;

use serde_json::Value;

use hx_compile::{EngineModel, canonical_number};

use crate::context::EvaluationContext;
use crate::metrics::EngineMetrics;
use crate::types::Event;

// ---------------------------------------------------------------------------
// EncodedValue — dictionary-space event values
// ---------------------------------------------------------------------------

/// An event attribute after dictionary encoding.
///
/// Every variant keeps enough of the original value for the operators that
/// need it: dictionary ids for equality and set membership, the raw string
/// for substring and regex operators, the numeric value for comparisons.
/// A `None` id is an encoding miss — the value exists in the event but not
/// in the compiled dictionary, so no dictionary-space predicate can match it.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    Num { value: f64, id: Option<u32> },
    Bool { value: bool, id: Option<u32> },
    Str { text: String, id: Option<u32> },
    Array(Vec<EncodedValue>),
}

impl EncodedValue {
    /// Dictionary id of the value's canonical text form, when interned.
    pub fn dict_id(&self) -> Option<u32> {
        match self {
            EncodedValue::Num { id, .. }
            | EncodedValue::Bool { id, .. }
            | EncodedValue::Str { id, .. } => *id,
            EncodedValue::Array(_) => None,
        }
    }

    pub fn num(&self) -> Option<f64> {
        match self {
            EncodedValue::Num { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            EncodedValue::Str { text, .. } => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event encoding
// ---------------------------------------------------------------------------

/// Encode an event into the context's scratch map: nested maps flatten to
/// dotted uppercase paths, values move into dictionary space. Fields the
/// model has never seen are skipped — no predicate can reference them.
/// Explicit JSON nulls are treated as absent.
pub(crate) fn encode_event(
    model: &EngineModel,
    event: &Event,
    ctx: &mut EvaluationContext,
    metrics: &EngineMetrics,
) {
    let mut path = std::mem::take(&mut ctx.path_buf);
    for (key, value) in &event.attributes {
        path.clear();
        push_upper(&mut path, key);
        walk(model, &mut path, value, &mut ctx.encoded, &mut ctx.present_fields, metrics);
    }
    ctx.path_buf = path;
}

fn walk(
    model: &EngineModel,
    path: &mut String,
    value: &Value,
    out: &mut HashMap<u32, EncodedValue>,
    present: &mut Vec<u32>,
    metrics: &EngineMetrics,
) {
    if let Value::Object(map) = value {
        for (key, child) in map {
            let rollback = path.len();
            path.push('.');
            push_upper(path, key);
            walk(model, path, child, out, present, metrics);
            path.truncate(rollback);
        }
        return;
    }
    if value.is_null() {
        return;
    }
    let Some(field_id) = model.fields.lookup(path) else {
        return;
    };
    if let Some(encoded) = encode_value(model, value, metrics)
        && out.insert(field_id, encoded).is_none()
    {
        present.push(field_id);
    }
}

fn encode_value(model: &EngineModel, value: &Value, metrics: &EngineMetrics) -> Option<EncodedValue> {
    match value {
        Value::String(s) => {
            let id = model.values.lookup(s);
            if id.is_none() {
                metrics.encoding_misses_total.fetch_add(1, Ordering::Relaxed);
            }
            Some(EncodedValue::Str {
                text: s.clone(),
                id,
            })
        }
        Value::Number(n) => {
            let value = n.as_f64()?;
            let id = model.values.lookup(&canonical_number(value));
            Some(EncodedValue::Num { value, id })
        }
        Value::Bool(b) => Some(EncodedValue::Bool {
            value: *b,
            id: model.values.lookup(if *b { "true" } else { "false" }),
        }),
        Value::Array(items) => Some(EncodedValue::Array(
            items
                .iter()
                .filter_map(|item| encode_value(model, item, metrics))
                .collect(),
        )),
        Value::Null | Value::Object(_) => None,
    }
}

// ASCII uppercasing, matching how rule field names are canonicalized at
// compile time.
fn push_upper(path: &mut String, segment: &str) {
    for c in segment.trim().chars() {
        path.push(c.to_ascii_uppercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_compile::compile_json;
    use hx_config::EngineConfig;
    use serde_json::json;

    fn model() -> EngineModel {
        compile_json(
            r#"[{"rule_code": "R", "conditions": [
                {"field": "status", "operator": "EQUAL_TO", "value": "ACTIVE"},
                {"field": "user.age", "operator": "GREATER_THAN", "value": 18},
                {"field": "amount", "operator": "GREATER_THAN", "value": 10}
            ]}]"#,
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn encode(model: &EngineModel, event: &Event) -> (HashMap<u32, EncodedValue>, Vec<u32>) {
        let metrics = EngineMetrics::default();
        crate::context::with_context(999, 1, |ctx| {
            ctx.reset();
            encode_event(model, event, ctx, &metrics);
            (ctx.encoded.clone(), ctx.present_fields.clone())
        })
    }

    #[test]
    fn nested_maps_flatten_to_dotted_uppercase() {
        let m = model();
        let event = Event::new("e1")
            .attr("status", json!("ACTIVE"))
            .attr("user", json!({"age": 30}));
        let (encoded, present) = encode(&m, &event);
        let age_field = m.fields.lookup("USER.AGE").unwrap();
        assert_eq!(encoded.get(&age_field).and_then(EncodedValue::num), Some(30.0));
        assert_eq!(present.len(), 2);
    }

    #[test]
    fn unknown_fields_and_nulls_are_absent() {
        let m = model();
        let event = Event::new("e2")
            .attr("unrelated", json!("x"))
            .attr("status", json!(null));
        let (encoded, present) = encode(&m, &event);
        assert!(encoded.is_empty());
        assert!(present.is_empty());
    }

    #[test]
    fn string_values_carry_dictionary_ids() {
        let m = model();
        let event = Event::new("e3").attr("status", json!("ACTIVE"));
        let (encoded, _) = encode(&m, &event);
        let status = m.fields.lookup("STATUS").unwrap();
        let v = encoded.get(&status).unwrap();
        assert_eq!(v.dict_id(), m.values.lookup("ACTIVE"));
        assert!(v.dict_id().is_some());
    }

    #[test]
    fn unseen_string_is_an_encoding_miss() {
        let m = model();
        let event = Event::new("e4").attr("status", json!("UNKNOWN"));
        let (encoded, _) = encode(&m, &event);
        let status = m.fields.lookup("STATUS").unwrap();
        assert_eq!(encoded.get(&status).unwrap().dict_id(), None);
    }
}
