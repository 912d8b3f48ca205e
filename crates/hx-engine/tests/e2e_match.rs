//! End-to-end matching scenarios: compile a ruleset, evaluate events,
//! check the emitted matches.

use std::sync::Arc;

use serde_json::json;

use hx_compile::compile_json;
use hx_config::{EngineConfig, SelectionStrategy};
use hx_engine::{Engine, Event};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine(rules: &str) -> Engine {
    engine_with(rules, EngineConfig::default())
}

fn engine_with(rules: &str, config: EngineConfig) -> Engine {
    let model = Arc::new(compile_json(rules, &config).unwrap());
    Engine::new(model, &config).unwrap()
}

fn codes(engine: &Engine, event: &Event) -> Vec<String> {
    engine
        .evaluate(event)
        .unwrap()
        .matched_rules
        .into_iter()
        .map(|m| m.rule_code)
        .collect()
}

// ---------------------------------------------------------------------------
// S1: conjunction of equality and numeric comparison
// ---------------------------------------------------------------------------

const S1: &str = r#"[{"rule_code": "A", "conditions": [
    {"field": "status", "operator": "EQUAL_TO", "value": "ACTIVE"},
    {"field": "amount", "operator": "GREATER_THAN", "value": 100}
]}]"#;

#[test]
fn s1_both_conditions_must_hold() {
    let eng = engine(S1);
    let hit = Event::new("e1")
        .attr("status", json!("ACTIVE"))
        .attr("amount", json!(150));
    assert_eq!(codes(&eng, &hit), vec!["A"]);

    let low = Event::new("e2")
        .attr("status", json!("ACTIVE"))
        .attr("amount", json!(50));
    assert!(codes(&eng, &low).is_empty());

    let wrong_status = Event::new("e3")
        .attr("status", json!("CLOSED"))
        .attr("amount", json!(150));
    assert!(codes(&eng, &wrong_status).is_empty());
}

// ---------------------------------------------------------------------------
// S2: disjunction expansion across two rules
// ---------------------------------------------------------------------------

const S2: &str = r#"[
  {"rule_code": "B", "conditions": [{"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]}]},
  {"rule_code": "C", "conditions": [{"field": "country", "operator": "IS_ANY_OF", "value": ["US", "MX"]}]}
]"#;

#[test]
fn s2_shared_value_matches_both_rules() {
    let eng = engine(S2);
    let us = Event::new("e1").attr("country", json!("US"));
    let mut got = codes(&eng, &us);
    got.sort();
    assert_eq!(got, vec!["B", "C"]);

    let ca = Event::new("e2").attr("country", json!("CA"));
    assert_eq!(codes(&eng, &ca), vec!["B"]);

    let fr = Event::new("e3").attr("country", json!("FR"));
    assert!(codes(&eng, &fr).is_empty());
}

// ---------------------------------------------------------------------------
// S3: deduplicated combination shared by two codes
// ---------------------------------------------------------------------------

const S3: &str = r#"[
  {"rule_code": "X", "priority": 1, "conditions": [{"field": "kind", "operator": "EQUAL_TO", "value": "T"}]},
  {"rule_code": "Y", "priority": 5, "conditions": [{"field": "kind", "operator": "EQUAL_TO", "value": "T"}]}
]"#;

#[test]
fn s3_all_matches_emits_both_codes_from_one_combination() {
    let eng = engine(S3);
    assert_eq!(eng.model().num_combinations(), 1);
    let event = Event::new("e").attr("kind", json!("T"));
    let result = eng.evaluate(&event).unwrap();
    assert_eq!(result.codes(), vec!["X", "Y"]);
    assert_eq!(result.rules_matched, 2);
    // Both matches carry the same combination id.
    assert_eq!(
        result.matched_rules[0].combination_id,
        result.matched_rules[1].combination_id
    );
}

#[test]
fn s3_highest_priority_keeps_the_higher_and_preserves_ties() {
    let mut config = EngineConfig::default();
    config.engine.selection = SelectionStrategy::HighestPriority;
    let eng = engine_with(S3, config.clone());
    let event = Event::new("e").attr("kind", json!("T"));
    assert_eq!(codes(&eng, &event), vec!["Y"]);

    let tied = r#"[
      {"rule_code": "X", "priority": 5, "conditions": [{"field": "kind", "operator": "EQUAL_TO", "value": "T"}]},
      {"rule_code": "Y", "priority": 5, "conditions": [{"field": "kind", "operator": "EQUAL_TO", "value": "T"}]}
    ]"#;
    let eng = engine_with(tied, config);
    let mut got = codes(&eng, &event);
    got.sort();
    assert_eq!(got, vec!["X", "Y"]);
}

#[test]
fn first_match_emits_a_single_entry() {
    let mut config = EngineConfig::default();
    config.engine.selection = SelectionStrategy::FirstMatch;
    let eng = engine_with(S2, config);
    let event = Event::new("e").attr("country", json!("US"));
    assert_eq!(codes(&eng, &event).len(), 1);
}

// ---------------------------------------------------------------------------
// S4: contradictory rule compiles to an empty model
// ---------------------------------------------------------------------------

#[test]
fn s4_contradiction_yields_no_combinations_and_no_matches() {
    let eng = engine(
        r#"[{"rule_code": "D", "conditions": [
            {"field": "x", "operator": "GREATER_THAN", "value": 100},
            {"field": "x", "operator": "LESS_THAN", "value": 50}
        ]}]"#,
    );
    assert_eq!(eng.model().num_combinations(), 0);
    assert_eq!(eng.model().stats.dead_rules, vec!["D".to_string()]);
    for value in [0, 75, 200] {
        let event = Event::new("e").attr("x", json!(value));
        assert!(codes(&eng, &event).is_empty());
    }
}

// ---------------------------------------------------------------------------
// S5: factorization preserves semantics
// ---------------------------------------------------------------------------

const S5: &str = r#"[
  {"rule_code": "R1", "conditions": [
    {"field": "amount", "operator": "GREATER_THAN", "value": 10},
    {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA", "UK"]}]},
  {"rule_code": "R2", "conditions": [
    {"field": "amount", "operator": "GREATER_THAN", "value": 10},
    {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]}]}
]"#;

#[test]
fn s5_factorized_rules_match_exactly_like_the_originals() {
    let eng = engine(S5);
    assert_eq!(eng.model().stats.factored_fields, 1);

    let uk = Event::new("e1").attr("amount", json!(20)).attr("country", json!("UK"));
    assert_eq!(codes(&eng, &uk), vec!["R1"]);

    let us = Event::new("e2").attr("amount", json!(20)).attr("country", json!("US"));
    let mut got = codes(&eng, &us);
    got.sort();
    assert_eq!(got, vec!["R1", "R2"]);

    let small = Event::new("e3").attr("amount", json!(5)).attr("country", json!("US"));
    assert!(codes(&eng, &small).is_empty());
}

// ---------------------------------------------------------------------------
// S6: cache hit rate and transparency
// ---------------------------------------------------------------------------

#[test]
fn s6_repeated_event_hits_the_cache_without_changing_matches() {
    let cached = engine(S1);
    let mut uncached_config = EngineConfig::default();
    uncached_config.cache.enabled = false;
    let uncached = engine_with(S1, uncached_config);

    let event = Event::new("e")
        .attr("status", json!("ACTIVE"))
        .attr("amount", json!(150));

    let baseline = codes(&uncached, &event);
    for _ in 0..1000 {
        assert_eq!(codes(&cached, &event), baseline);
    }

    let metrics = cached.metrics_snapshot();
    assert!(
        metrics.cache.hit_rate() >= 0.99,
        "hit rate {} below 99%",
        metrics.cache.hit_rate()
    );
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[test]
fn empty_attributes_match_nothing_but_null_rules() {
    let eng = engine(
        r#"[
          {"rule_code": "VAL", "conditions": [{"field": "a", "operator": "EQUAL_TO", "value": 1}]},
          {"rule_code": "NULL_A", "conditions": [{"field": "a", "operator": "IS_NULL"}]}
        ]"#,
    );
    let empty = Event::new("e");
    assert_eq!(codes(&eng, &empty), vec!["NULL_A"]);
}

#[test]
fn single_predicate_rule_matches() {
    let eng = engine(r#"[{"rule_code": "ONE", "conditions": [{"field": "f", "operator": "IS_NOT_NULL"}]}]"#);
    let event = Event::new("e").attr("f", json!("anything"));
    assert_eq!(codes(&eng, &event), vec!["ONE"]);
}

#[test]
fn wide_rule_with_over_100_predicates() {
    let conditions: Vec<String> = (0..101)
        .map(|i| format!(r#"{{"field": "f{i}", "operator": "EQUAL_TO", "value": {i}}}"#))
        .collect();
    let rules = format!(r#"[{{"rule_code": "WIDE", "conditions": [{}]}}]"#, conditions.join(","));
    let eng = engine(&rules);

    let mut full = Event::new("all");
    for i in 0..101 {
        full = full.attr(&format!("f{i}"), json!(i));
    }
    assert_eq!(codes(&eng, &full), vec!["WIDE"]);

    // One missing predicate leaves the counter one short.
    let mut partial = Event::new("partial");
    for i in 0..100 {
        partial = partial.attr(&format!("f{i}"), json!(i));
    }
    assert!(codes(&eng, &partial).is_empty());
}

#[test]
fn large_is_any_of_set() {
    let values: Vec<String> = (0..10_000).map(|i| format!(r#""V{i}""#)).collect();
    let rules = format!(
        r#"[{{"rule_code": "BIG", "conditions": [{{"field": "v", "operator": "IS_ANY_OF", "value": [{}]}}]}}]"#,
        values.join(",")
    );
    let eng = engine(&rules);
    assert_eq!(codes(&eng, &Event::new("hit").attr("v", json!("V9999"))), vec!["BIG"]);
    assert!(codes(&eng, &Event::new("miss").attr("v", json!("V10000"))).is_empty());
}

#[test]
fn regex_against_empty_string() {
    let eng = engine(
        r#"[
          {"rule_code": "ANY", "conditions": [{"field": "s", "operator": "REGEX", "value": ".*"}]},
          {"rule_code": "DIGITS", "conditions": [{"field": "s", "operator": "REGEX", "value": "[0-9]+"}]}
        ]"#,
    );
    let event = Event::new("e").attr("s", json!(""));
    assert_eq!(codes(&eng, &event), vec!["ANY"]);
}

#[test]
fn between_matches_exact_bounds() {
    let eng = engine(r#"[{"rule_code": "R", "conditions": [{"field": "n", "operator": "BETWEEN", "value": [10, 20]}]}]"#);
    for (value, expect) in [(10, true), (20, true), (15, true), (9, false), (21, false)] {
        let event = Event::new("e").attr("n", json!(value));
        assert_eq!(!codes(&eng, &event).is_empty(), expect, "n = {value}");
    }
}

#[test]
fn not_equal_and_none_of_require_presence() {
    let eng = engine(
        r#"[
          {"rule_code": "NE", "conditions": [{"field": "s", "operator": "NOT_EQUAL_TO", "value": "X"}]},
          {"rule_code": "NONE", "conditions": [{"field": "s", "operator": "IS_NONE_OF", "value": ["X", "Y"]}]}
        ]"#,
    );
    let other = Event::new("e1").attr("s", json!("Z"));
    let mut got = codes(&eng, &other);
    got.sort();
    assert_eq!(got, vec!["NE", "NONE"]);

    let x = Event::new("e2").attr("s", json!("X"));
    assert!(codes(&eng, &x).is_empty());

    // Absent field: neither rule fires.
    let absent = Event::new("e3");
    assert!(codes(&eng, &absent).is_empty());
}

#[test]
fn nested_attributes_and_array_membership() {
    let eng = engine(
        r#"[
          {"rule_code": "DEEP", "conditions": [{"field": "user.tier", "operator": "EQUAL_TO", "value": "GOLD"}]},
          {"rule_code": "TAGGED", "conditions": [{"field": "tags", "operator": "IS_ANY_OF", "value": ["vip"]}]}
        ]"#,
    );
    let event = Event::new("e")
        .attr("user", json!({"tier": "GOLD"}))
        .attr("tags", json!(["standard", "vip"]));
    let mut got = codes(&eng, &event);
    got.sort();
    assert_eq!(got, vec!["DEEP", "TAGGED"]);
}

// ---------------------------------------------------------------------------
// Determinism, reset correctness, concurrency
// ---------------------------------------------------------------------------

#[test]
fn repeated_evaluation_is_deterministic() {
    let eng = engine(S5);
    let event = Event::new("e").attr("amount", json!(20)).attr("country", json!("US"));
    let first = eng.evaluate(&event).unwrap();
    for _ in 0..50 {
        let next = eng.evaluate(&event).unwrap();
        assert_eq!(next.matched_rules, first.matched_rules);
    }
}

#[test]
fn context_reuse_does_not_leak_state_between_events() {
    let eng = engine(S1);
    let hit = Event::new("hit")
        .attr("status", json!("ACTIVE"))
        .attr("amount", json!(150));
    let near_miss = Event::new("near")
        .attr("status", json!("ACTIVE"))
        .attr("amount", json!(50));

    let fresh = eng.evaluate(&hit).unwrap();
    for _ in 0..20 {
        assert!(eng.evaluate(&near_miss).unwrap().matched_rules.is_empty());
        let again = eng.evaluate(&hit).unwrap();
        assert_eq!(again.matched_rules, fresh.matched_rules);
    }
}

#[test]
fn concurrent_evaluation_on_a_shared_engine() {
    let eng = Arc::new(engine(S2));
    let mut handles = Vec::new();
    for i in 0..4 {
        let eng = eng.clone();
        handles.push(std::thread::spawn(move || {
            let country = if i % 2 == 0 { "US" } else { "CA" };
            let event = Event::new(format!("e{i}")).attr("country", json!(country));
            for _ in 0..200 {
                let result = eng.evaluate(&event).unwrap();
                if country == "US" {
                    assert_eq!(result.rules_matched, 2);
                } else {
                    assert_eq!(result.rules_matched, 1);
                }
            }
            hx_engine::detach_thread_context();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn evaluation_reports_counters() {
    let eng = engine(S1);
    let event = Event::new("e")
        .attr("status", json!("ACTIVE"))
        .attr("amount", json!(150));
    let result = eng.evaluate(&event).unwrap();
    assert_eq!(result.event_id, "e");
    assert!(result.predicates_evaluated >= 2);
    assert_eq!(result.rules_matched, 1);

    let snapshot = eng.metrics_snapshot();
    assert_eq!(snapshot.events_total, 1);
    assert_eq!(snapshot.matches_total, 1);
}
