//! Compiler failure surface: every rejection class, end to end through
//! `compile_json`, plus the non-fatal accounting paths.

use hx_compile::{CompileError, compile_json};
use hx_config::EngineConfig;

fn compile_err(rules: &str) -> CompileError {
    compile_json(rules, &EngineConfig::default()).unwrap_err()
}

#[test]
fn empty_rule_set() {
    assert!(matches!(compile_err("[]"), CompileError::EmptyRuleSet));
}

#[test]
fn missing_code() {
    let err = compile_err(r#"[{"conditions": [{"field": "a", "operator": "IS_NULL"}]}]"#);
    assert!(matches!(err, CompileError::MissingCode { index: 0 }));
}

#[test]
fn duplicate_code() {
    let err = compile_err(
        r#"[
          {"rule_code": "A", "conditions": [{"field": "a", "operator": "IS_NULL"}]},
          {"rule_code": "A", "conditions": [{"field": "b", "operator": "IS_NULL"}]}
        ]"#,
    );
    match err {
        CompileError::DuplicateCode { code } => assert_eq!(code, "A"),
        other => panic!("expected DuplicateCode, got {other}"),
    }
}

#[test]
fn unknown_operator() {
    let err = compile_err(
        r#"[{"rule_code": "A", "conditions": [{"field": "a", "operator": "RESEMBLES", "value": 1}]}]"#,
    );
    match err {
        CompileError::UnknownOperator { rule, operator } => {
            assert_eq!(rule, "A");
            assert_eq!(operator, "RESEMBLES");
        }
        other => panic!("expected UnknownOperator, got {other}"),
    }
}

#[test]
fn malformed_conditions() {
    let cases = [
        r#"{"field": "a", "operator": "BETWEEN", "value": 5}"#,
        r#"{"field": "a", "operator": "BETWEEN", "value": [1, 2, 3]}"#,
        r#"{"field": "a", "operator": "IS_ANY_OF", "value": "US"}"#,
        r#"{"field": "a", "operator": "GREATER_THAN", "value": "big"}"#,
        r#"{"field": "", "operator": "IS_NULL"}"#,
        r#"{"field": "a", "operator": "EQUAL_TO", "value": [1]}"#,
    ];
    for cond in cases {
        let rules = format!(r#"[{{"rule_code": "A", "conditions": [{cond}]}}]"#);
        assert!(
            matches!(compile_err(&rules), CompileError::MalformedCondition { .. }),
            "expected MalformedCondition for {cond}",
        );
    }
}

#[test]
fn rule_without_conditions_is_malformed() {
    let err = compile_err(r#"[{"rule_code": "A", "conditions": []}]"#);
    assert!(matches!(err, CompileError::MalformedCondition { .. }));
}

#[test]
fn bad_pattern() {
    let err = compile_err(
        r#"[{"rule_code": "A", "conditions": [{"field": "a", "operator": "REGEX", "value": "[unterminated"}]}]"#,
    );
    match err {
        CompileError::BadPattern { rule, pattern, .. } => {
            assert_eq!(rule, "A");
            assert_eq!(pattern, "[unterminated");
        }
        other => panic!("expected BadPattern, got {other}"),
    }
}

#[test]
fn broken_json_is_a_syntax_error() {
    assert!(matches!(compile_err("not json"), CompileError::Syntax(_)));
}

#[test]
fn no_partial_model_on_late_failure() {
    // The bad rule sits last; the valid ones before it must not leak out.
    let err = compile_err(
        r#"[
          {"rule_code": "GOOD1", "conditions": [{"field": "a", "operator": "EQUAL_TO", "value": 1}]},
          {"rule_code": "GOOD2", "conditions": [{"field": "b", "operator": "EQUAL_TO", "value": 2}]},
          {"rule_code": "BAD", "conditions": [{"field": "c", "operator": "REGEX", "value": "("}]}
        ]"#,
    );
    assert!(matches!(err, CompileError::BadPattern { .. }));
}

#[test]
fn contradictions_and_dead_rules_are_non_fatal() {
    let model = compile_json(
        r#"[
          {"rule_code": "LIVE", "conditions": [{"field": "a", "operator": "EQUAL_TO", "value": 1}]},
          {"rule_code": "DEAD", "conditions": [
            {"field": "x", "operator": "GREATER_THAN", "value": 10},
            {"field": "x", "operator": "LESS_THAN", "value": 5}]}
        ]"#,
        &EngineConfig::default(),
    )
    .unwrap();
    assert_eq!(model.num_combinations(), 1);
    assert_eq!(model.stats.contradictions_dropped, 1);
    assert_eq!(model.stats.dead_rules, vec!["DEAD".to_string()]);
}
