use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::{CompileError, CompileResult};
use crate::ir::{AtomicBranch, NormRule};
use crate::model::RuleBinding;
use crate::predicate::{Operator, Predicate, PredicateRegistry, PredicateValue, Scalar};

// ---------------------------------------------------------------------------
// Combination building — disjunction expansion + dedup
// ---------------------------------------------------------------------------

/// A conjunctive combination before SoA assembly: its canonically sorted
/// predicate-id set and every logical rule bound to it, in rule order.
#[derive(Debug)]
pub(crate) struct CombinationDraft {
    pub predicate_ids: Vec<u32>,
    pub rules: Vec<RuleBinding>,
}

#[derive(Debug, Default)]
pub(crate) struct CombineOutcome {
    pub drafts: Vec<CombinationDraft>,
    pub contradictions_dropped: u32,
    pub duplicate_bindings: u32,
    pub dead_rules: Vec<String>,
}

/// Expand every rule into the Cartesian product of its disjunction branches
/// and its conjuncts, deduplicating identical predicate-id sets into shared
/// combinations.
///
/// Authored `IS_ANY_OF` members each expand to one `EQUAL_TO` alternative in
/// dictionary space; factorizer-produced branches expand to a single atomic
/// predicate. Contradictory products are dropped and counted; a rule whose
/// products all drop is dead (reported, not fatal).
pub(crate) fn build_combinations(
    rules: &[NormRule],
    registry: &mut PredicateRegistry,
) -> CompileResult<CombineOutcome> {
    let mut index: HashMap<Vec<u32>, u32> = HashMap::new();
    let mut out = CombineOutcome::default();

    for rule in rules {
        let mut branches: Vec<Vec<u32>> = Vec::with_capacity(rule.disjunctions.len());
        for disj in &rule.disjunctions {
            let mut alts = Vec::with_capacity(disj.members.len() + disj.atomic.len());
            for &member in &disj.members {
                alts.push(registry.register(
                    disj.field_id,
                    Operator::EqualTo,
                    PredicateValue::Scalar(Scalar::Str(member)),
                ));
            }
            for branch in &disj.atomic {
                alts.push(match branch {
                    AtomicBranch::Set(ids) => registry.register(
                        disj.field_id,
                        Operator::IsAnyOf,
                        PredicateValue::Set(ids.clone()),
                    ),
                    AtomicBranch::Eq(v) => registry.register(
                        disj.field_id,
                        Operator::EqualTo,
                        PredicateValue::Scalar(Scalar::Str(*v)),
                    ),
                });
            }
            if alts.is_empty() {
                return Err(CompileError::InternalInvariant(format!(
                    "rule {:?}: disjunction on {:?} expanded to no branches",
                    rule.code, disj.field_name
                )));
            }
            branches.push(alts);
        }

        let mut produced = 0u32;
        for_each_product(&branches, |choice| {
            let mut ids = rule.conjuncts.clone();
            ids.extend_from_slice(choice);
            ids.sort_unstable();
            ids.dedup();
            if ids.is_empty() {
                return Err(CompileError::InternalInvariant(format!(
                    "rule {:?}: empty combination after expansion",
                    rule.code
                )));
            }

            if is_contradictory(&ids, registry) {
                out.contradictions_dropped += 1;
                return Ok(());
            }

            produced += 1;
            match index.entry(ids) {
                Entry::Occupied(slot) => {
                    let draft = &mut out.drafts[*slot.get() as usize];
                    // The same rule can reach one combination through
                    // overlapping branches; bind it once.
                    if !draft.rules.iter().any(|b| b.code == rule.code) {
                        draft.rules.push(binding(rule));
                        out.duplicate_bindings += 1;
                    }
                }
                Entry::Vacant(slot) => {
                    let ids = slot.key().clone();
                    slot.insert(out.drafts.len() as u32);
                    out.drafts.push(CombinationDraft {
                        predicate_ids: ids,
                        rules: vec![binding(rule)],
                    });
                }
            }
            Ok(())
        })?;

        if produced == 0 {
            out.dead_rules.push(rule.code.clone());
        }
    }

    Ok(out)
}

fn binding(rule: &NormRule) -> RuleBinding {
    RuleBinding {
        code: rule.code.clone(),
        priority: rule.priority,
        description: rule.description.clone(),
    }
}

/// Drive `f` over the Cartesian product of the branch lists. An empty branch
/// list yields exactly one empty choice.
fn for_each_product(
    branches: &[Vec<u32>],
    mut f: impl FnMut(&[u32]) -> CompileResult<()>,
) -> CompileResult<()> {
    let mut odometer = vec![0usize; branches.len()];
    let mut choice = Vec::with_capacity(branches.len());
    loop {
        choice.clear();
        for (alts, &i) in branches.iter().zip(&odometer) {
            choice.push(alts[i]);
        }
        f(&choice)?;

        let mut pos = branches.len();
        loop {
            if pos == 0 {
                return Ok(());
            }
            pos -= 1;
            odometer[pos] += 1;
            if odometer[pos] < branches[pos].len() {
                break;
            }
            odometer[pos] = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Contradiction detection
// ---------------------------------------------------------------------------

/// True when two predicates on the same field can never hold together
/// (e.g. `x > 100` and `x < 50`). Checks are conservative: an uncertain pair
/// is treated as satisfiable.
fn is_contradictory(ids: &[u32], registry: &PredicateRegistry) -> bool {
    let mut by_field: HashMap<u32, Vec<&Predicate>> = HashMap::new();
    for &id in ids {
        if let Some(p) = registry.get(id) {
            by_field.entry(p.field_id).or_default().push(p);
        }
    }
    for preds in by_field.values() {
        for (i, a) in preds.iter().enumerate() {
            for b in &preds[i + 1..] {
                if incompatible(a, b) || incompatible(b, a) {
                    return true;
                }
            }
        }
    }
    false
}

fn incompatible(a: &Predicate, b: &Predicate) -> bool {
    use Operator::*;
    match (a.op, b.op) {
        // A field absent for IS_NULL cannot satisfy any value predicate.
        (IsNull, other) if other != IsNull => true,

        (EqualTo, EqualTo) => match (scalar(a), scalar(b)) {
            (Some(Scalar::Str(x)), Some(Scalar::Str(y))) => x != y,
            (Some(Scalar::Num(x)), Some(Scalar::Num(y))) => x != y,
            (Some(Scalar::Bool(x)), Some(Scalar::Bool(y))) => x != y,
            _ => false,
        },
        (EqualTo, NotEqualTo) => match (scalar(a), scalar(b)) {
            (Some(Scalar::Str(x)), Some(Scalar::Str(y))) => x == y,
            (Some(Scalar::Num(x)), Some(Scalar::Num(y))) => x == y,
            (Some(Scalar::Bool(x)), Some(Scalar::Bool(y))) => x == y,
            _ => false,
        },
        (EqualTo, GreaterThan) => matches!((scalar(a), num(b)), (Some(Scalar::Num(n)), Some(g)) if n <= g),
        (EqualTo, LessThan) => matches!((scalar(a), num(b)), (Some(Scalar::Num(n)), Some(l)) if n >= l),
        (EqualTo, Between) => match (scalar(a), &b.value) {
            (Some(Scalar::Num(n)), PredicateValue::Range { lo, hi }) => n < *lo || n > *hi,
            _ => false,
        },
        (EqualTo, IsAnyOf) => match (scalar(a), set(b)) {
            (Some(Scalar::Str(id)), Some(s)) => s.binary_search(&id).is_err(),
            _ => false,
        },
        (EqualTo, IsNoneOf) => match (scalar(a), set(b)) {
            (Some(Scalar::Str(id)), Some(s)) => s.binary_search(&id).is_ok(),
            _ => false,
        },

        // x > g and x < l is unsatisfiable as soon as l <= g.
        (GreaterThan, LessThan) => matches!((num(a), num(b)), (Some(g), Some(l)) if l <= g),
        (GreaterThan, Between) => match (num(a), &b.value) {
            (Some(g), PredicateValue::Range { hi, .. }) => *hi <= g,
            _ => false,
        },
        (LessThan, Between) => match (num(a), &b.value) {
            (Some(l), PredicateValue::Range { lo, .. }) => *lo >= l,
            _ => false,
        },
        (Between, Between) => match (&a.value, &b.value) {
            (
                PredicateValue::Range { lo: alo, hi: ahi },
                PredicateValue::Range { lo: blo, hi: bhi },
            ) => ahi < blo || bhi < alo,
            _ => false,
        },

        (IsAnyOf, IsAnyOf) => match (set(a), set(b)) {
            (Some(x), Some(y)) => x.iter().all(|v| y.binary_search(v).is_err()),
            _ => false,
        },
        (IsAnyOf, IsNoneOf) => match (set(a), set(b)) {
            (Some(x), Some(y)) => x.iter().all(|v| y.binary_search(v).is_ok()),
            _ => false,
        },

        _ => false,
    }
}

fn scalar(p: &Predicate) -> Option<Scalar> {
    match &p.value {
        PredicateValue::Scalar(s) => Some(*s),
        _ => None,
    }
}

fn num(p: &Predicate) -> Option<f64> {
    match &p.value {
        PredicateValue::Scalar(Scalar::Num(n)) => Some(*n),
        _ => None,
    }
}

fn set(p: &Predicate) -> Option<&[u32]> {
    match &p.value {
        PredicateValue::Set(ids) => Some(ids),
        _ => None,
    }
}
