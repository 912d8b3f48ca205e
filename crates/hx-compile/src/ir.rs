use serde_json::Value;

use crate::dict::Dictionary;
use crate::error::{CompileError, CompileResult};
use crate::predicate::{
    Operator, PredicateRegistry, PredicateValue, Scalar, canonical_number, canonical_set,
};
use crate::rules::{RuleSpec, parse_operator};

// ---------------------------------------------------------------------------
// Normalized rule IR — between validation and combination building
// ---------------------------------------------------------------------------

/// A logical rule lowered into dictionary space: registered conjunctive
/// predicates plus per-field disjunctions awaiting factorization and
/// expansion.
#[derive(Debug)]
pub(crate) struct NormRule {
    pub code: String,
    pub priority: i32,
    pub description: String,
    /// Sorted predicate ids of the non-disjunctive conditions.
    pub conjuncts: Vec<u32>,
    pub disjunctions: Vec<Disjunction>,
}

/// One authored `IS_ANY_OF` condition. `members` holds the value-dictionary
/// ids still subject to factorization and, ultimately, per-value expansion;
/// `atomic` collects the factorizer-produced alternatives that expand as a
/// single predicate each.
#[derive(Debug)]
pub(crate) struct Disjunction {
    pub field_id: u32,
    pub field_name: String,
    /// Sorted, deduplicated value-dictionary ids.
    pub members: Vec<u32>,
    pub atomic: Vec<AtomicBranch>,
}

/// A disjunction alternative that lowers to exactly one predicate.
#[derive(Debug)]
pub(crate) enum AtomicBranch {
    /// `IS_ANY_OF` over sorted value-dictionary ids.
    Set(Vec<u32>),
    /// `EQUAL_TO` a single dictionary-space value.
    Eq(u32),
}

// ---------------------------------------------------------------------------
// Lowering — RuleSpec → NormRule
// ---------------------------------------------------------------------------

/// Canonical text form of an authored scalar. Numbers and booleans intern
/// through the value dictionary by this rendering, so `10`, `10.0`, and the
/// event-side string `"10"` all meet at one id.
pub(crate) fn canonical_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(canonical_number(n.as_f64()?)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lower every enabled rule into the IR, registering all non-disjunctive
/// predicates. Assumes `validate` has already accepted the ruleset.
pub(crate) fn lower_rules(
    rules: &[RuleSpec],
    fields: &mut Dictionary,
    values: &mut Dictionary,
    registry: &mut PredicateRegistry,
) -> CompileResult<Vec<NormRule>> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules.iter().filter(|r| r.enabled) {
        out.push(lower_rule(rule, fields, values, registry)?);
    }
    Ok(out)
}

fn lower_rule(
    rule: &RuleSpec,
    fields: &mut Dictionary,
    values: &mut Dictionary,
    registry: &mut PredicateRegistry,
) -> CompileResult<NormRule> {
    let mut conjuncts = Vec::new();
    let mut disjunctions = Vec::new();

    for cond in &rule.conditions {
        let field_name = cond.field.trim().to_ascii_uppercase();
        let field_id = fields.encode(&field_name);
        let op = parse_operator(&cond.operator).ok_or_else(|| CompileError::UnknownOperator {
            rule: rule.code.clone(),
            operator: cond.operator.clone(),
        })?;

        use Operator::*;
        match op {
            IsAnyOf => {
                let items = cond.value.as_array().ok_or_else(|| internal(rule, "IS_ANY_OF"))?;
                let members = canonical_set(
                    values,
                    items.iter().filter_map(canonical_text),
                );
                disjunctions.push(Disjunction {
                    field_id,
                    field_name,
                    members,
                    atomic: Vec::new(),
                });
            }
            IsNoneOf => {
                let items = cond.value.as_array().ok_or_else(|| internal(rule, "IS_NONE_OF"))?;
                let set = canonical_set(values, items.iter().filter_map(canonical_text));
                conjuncts.push(registry.register(field_id, IsNoneOf, PredicateValue::Set(set)));
            }
            EqualTo | NotEqualTo => {
                let scalar = lower_scalar(&cond.value, values).ok_or_else(|| internal(rule, "scalar"))?;
                conjuncts.push(registry.register(field_id, op, PredicateValue::Scalar(scalar)));
            }
            GreaterThan | LessThan => {
                let n = cond.value.as_f64().ok_or_else(|| internal(rule, "number"))?;
                conjuncts.push(registry.register(field_id, op, PredicateValue::Scalar(Scalar::Num(n))));
            }
            Between => {
                let pair = cond.value.as_array().ok_or_else(|| internal(rule, "BETWEEN"))?;
                let lo = pair.first().and_then(Value::as_f64).ok_or_else(|| internal(rule, "BETWEEN"))?;
                let hi = pair.get(1).and_then(Value::as_f64).ok_or_else(|| internal(rule, "BETWEEN"))?;
                conjuncts.push(registry.register(field_id, Between, PredicateValue::Range { lo, hi }));
            }
            Contains | StartsWith | EndsWith => {
                let text = cond.value.as_str().ok_or_else(|| internal(rule, "string"))?;
                conjuncts.push(registry.register(field_id, op, PredicateValue::Text(text.to_string())));
            }
            Regex => {
                let pattern = cond.value.as_str().ok_or_else(|| internal(rule, "pattern"))?;
                conjuncts.push(registry.register_regex(field_id, pattern, &rule.code)?);
            }
            IsNull | IsNotNull => {
                conjuncts.push(registry.register(field_id, op, PredicateValue::None));
            }
        }
    }

    conjuncts.sort_unstable();
    conjuncts.dedup();

    Ok(NormRule {
        code: rule.code.clone(),
        priority: rule.priority,
        description: rule.description.clone(),
        conjuncts,
        disjunctions,
    })
}

fn lower_scalar(v: &Value, values: &mut Dictionary) -> Option<Scalar> {
    match v {
        Value::String(s) => Some(Scalar::Str(values.encode(s))),
        Value::Number(n) => Some(Scalar::Num(n.as_f64()?)),
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        _ => None,
    }
}

// Validation runs before lowering; a shape mismatch here means the pipeline
// was driven out of order.
fn internal(rule: &RuleSpec, what: &str) -> CompileError {
    CompileError::InternalInvariant(format!(
        "rule {:?}: unvalidated {what} condition reached lowering",
        rule.code
    ))
}
