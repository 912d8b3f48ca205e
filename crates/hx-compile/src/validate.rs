use std::collections::HashSet;

use serde_json::Value;

use crate::error::{CompileError, CompileResult};
use crate::predicate::{CompiledPattern, Operator};
use crate::rules::{ConditionSpec, RuleSpec, parse_operator};

/// Validate a parsed ruleset before compilation. Fails fast with the first
/// error in rule order; compilation never proceeds past a failed validation.
pub fn validate(rules: &[RuleSpec]) -> CompileResult<()> {
    if rules.is_empty() {
        return Err(CompileError::EmptyRuleSet);
    }

    let mut seen = HashSet::new();
    for (index, rule) in rules.iter().enumerate() {
        if rule.code.trim().is_empty() {
            return Err(CompileError::MissingCode { index });
        }
        if !seen.insert(rule.code.as_str()) {
            return Err(CompileError::DuplicateCode {
                code: rule.code.clone(),
            });
        }
        if rule.conditions.is_empty() {
            return Err(malformed(rule, "rule has no conditions"));
        }
        for cond in &rule.conditions {
            check_condition(rule, cond)?;
        }
    }
    Ok(())
}

fn check_condition(rule: &RuleSpec, cond: &ConditionSpec) -> CompileResult<()> {
    if cond.field.trim().is_empty() {
        return Err(malformed(rule, "condition has an empty field name"));
    }

    let op = parse_operator(&cond.operator).ok_or_else(|| CompileError::UnknownOperator {
        rule: rule.code.clone(),
        operator: cond.operator.clone(),
    })?;

    use Operator::*;
    match op {
        EqualTo | NotEqualTo => {
            if !is_scalar(&cond.value) {
                return Err(malformed(
                    rule,
                    &format!("{} requires a scalar value", op.as_str()),
                ));
            }
        }
        GreaterThan | LessThan => {
            if !cond.value.is_number() {
                return Err(malformed(
                    rule,
                    &format!("{} requires a numeric value", op.as_str()),
                ));
            }
        }
        Between => match cond.value.as_array() {
            Some(pair) if pair.len() == 2 && pair.iter().all(Value::is_number) => {
                let lo = pair[0].as_f64().unwrap_or(f64::NAN);
                let hi = pair[1].as_f64().unwrap_or(f64::NAN);
                if !(lo <= hi) {
                    return Err(malformed(rule, "BETWEEN bounds are inverted"));
                }
            }
            _ => return Err(malformed(rule, "BETWEEN requires a [lo, hi] numeric pair")),
        },
        IsAnyOf | IsNoneOf => match cond.value.as_array() {
            Some(items) if !items.is_empty() && items.iter().all(is_scalar) => {}
            Some(_) => {
                return Err(malformed(
                    rule,
                    &format!("{} requires a non-empty array of scalars", op.as_str()),
                ));
            }
            None => {
                return Err(malformed(
                    rule,
                    &format!("{} requires an array value", op.as_str()),
                ));
            }
        },
        Contains | StartsWith | EndsWith => {
            if !cond.value.is_string() {
                return Err(malformed(
                    rule,
                    &format!("{} requires a string value", op.as_str()),
                ));
            }
        }
        Regex => {
            let pattern = cond.value.as_str().ok_or_else(|| {
                malformed(rule, "REGEX requires a string pattern")
            })?;
            CompiledPattern::compile(pattern).map_err(|e| CompileError::BadPattern {
                rule: rule.code.clone(),
                pattern: pattern.to_string(),
                source: Box::new(e),
            })?;
        }
        // Presence checks carry no operand; a stray value is ignored.
        IsNull | IsNotNull => {}
    }
    Ok(())
}

fn is_scalar(v: &Value) -> bool {
    v.is_string() || v.is_number() || v.is_boolean()
}

fn malformed(rule: &RuleSpec, detail: &str) -> CompileError {
    CompileError::MalformedCondition {
        rule: rule.code.clone(),
        detail: detail.to_string(),
    }
}
