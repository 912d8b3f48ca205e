use roaring::RoaringBitmap;

use hx_compile::{EngineModel, Operator, Predicate, PredicateValue, Scalar, canonical_number};

use crate::encode::EncodedValue;

// ---------------------------------------------------------------------------
// Predicate evaluation — per-field operator dispatch
// ---------------------------------------------------------------------------

/// Evaluate a list of predicates against one encoded field value.
///
/// Ids outside `filter` (when given) are skipped without being counted. True
/// predicate ids land in `sink`; every attempted predicate bumps `evaluated`.
pub(crate) fn evaluate_predicates(
    model: &EngineModel,
    pids: &[u32],
    value: Option<&EncodedValue>,
    filter: Option<&RoaringBitmap>,
    sink: &mut Vec<u32>,
    evaluated: &mut u64,
) {
    for &pid in pids {
        if let Some(f) = filter
            && !f.contains(pid)
        {
            continue;
        }
        let Some(predicate) = model.predicates.get(pid as usize) else {
            continue;
        };
        *evaluated += 1;
        if predicate_holds(predicate, value) {
            sink.push(pid);
        }
    }
}

/// Operator semantics:
/// - equality on strings is dictionary-space (canonical-text) equality, so a
///   numeric event value equals a set member or expanded `EQUAL_TO` operand
///   through its canonical rendering;
/// - numeric comparisons apply to numeric event values only;
/// - `BETWEEN` is inclusive on both ends;
/// - substring and regex operators apply to the decoded string;
/// - `REGEX` is full-match (the pattern was compiled anchored);
/// - `IS_NULL` / `IS_NOT_NULL` test absence/presence;
/// - an array event value is meaningful to set membership (any element in
///   the set) and `CONTAINS` (any element equal to the operand).
pub(crate) fn predicate_holds(p: &Predicate, value: Option<&EncodedValue>) -> bool {
    use Operator::*;
    match p.op {
        IsNull => return value.is_none(),
        IsNotNull => return value.is_some(),
        _ => {}
    }
    let Some(v) = value else {
        return false;
    };
    match p.op {
        EqualTo => scalar_eq(p, v),
        NotEqualTo => !scalar_eq(p, v),
        GreaterThan => match (&p.value, v.num()) {
            (PredicateValue::Scalar(Scalar::Num(n)), Some(x)) => x > *n,
            _ => false,
        },
        LessThan => match (&p.value, v.num()) {
            (PredicateValue::Scalar(Scalar::Num(n)), Some(x)) => x < *n,
            _ => false,
        },
        Between => match (&p.value, v.num()) {
            (PredicateValue::Range { lo, hi }, Some(x)) => *lo <= x && x <= *hi,
            _ => false,
        },
        IsAnyOf => set_member(p, v),
        IsNoneOf => !set_member(p, v),
        Contains => match &p.value {
            PredicateValue::Text(needle) => match v {
                EncodedValue::Str { text, .. } => text.contains(needle.as_str()),
                EncodedValue::Array(items) => items.iter().any(|e| element_eq(e, needle)),
                _ => false,
            },
            _ => false,
        },
        StartsWith => match (&p.value, v.text()) {
            (PredicateValue::Text(prefix), Some(text)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        EndsWith => match (&p.value, v.text()) {
            (PredicateValue::Text(suffix), Some(text)) => text.ends_with(suffix.as_str()),
            _ => false,
        },
        Regex => match (&p.value, v.text()) {
            (PredicateValue::Pattern(pattern), Some(text)) => pattern.regex.is_match(text),
            _ => false,
        },
        IsNull | IsNotNull => unreachable!("handled above"),
    }
}

fn scalar_eq(p: &Predicate, v: &EncodedValue) -> bool {
    match &p.value {
        PredicateValue::Scalar(Scalar::Num(n)) => v.num() == Some(*n),
        PredicateValue::Scalar(Scalar::Bool(b)) => matches!(v, EncodedValue::Bool { value, .. } if value == b),
        PredicateValue::Scalar(Scalar::Str(id)) => v.dict_id() == Some(*id),
        _ => false,
    }
}

fn set_member(p: &Predicate, v: &EncodedValue) -> bool {
    let PredicateValue::Set(ids) = &p.value else {
        return false;
    };
    match v {
        EncodedValue::Array(items) => items
            .iter()
            .any(|e| e.dict_id().is_some_and(|id| ids.binary_search(&id).is_ok())),
        _ => v
            .dict_id()
            .is_some_and(|id| ids.binary_search(&id).is_ok()),
    }
}

/// Equality between an array element and a text operand: string identity, or
/// the canonical rendering for numbers and booleans.
fn element_eq(e: &EncodedValue, needle: &str) -> bool {
    match e {
        EncodedValue::Str { text, .. } => text == needle,
        EncodedValue::Num { value, .. } => canonical_number(*value) == needle,
        EncodedValue::Bool { value, .. } => (if *value { "true" } else { "false" }) == needle,
        EncodedValue::Array(_) => false,
    }
}
