use std::collections::HashMap;

use tracing::debug;

use crate::ir::{AtomicBranch, NormRule};

// ---------------------------------------------------------------------------
// Factorizer — common-subset extraction across disjunctions
// ---------------------------------------------------------------------------

/// Rewrite rules so that groups sharing the same non-disjunctive signature
/// carry their common disjunction values as one shared set predicate.
///
/// For each signature group and each disjunctive field common to all of its
/// members, the intersection I of the members' value sets is computed; when
/// |I| ≥ 2 every member is rewritten to the atomic set I plus a remainder
/// branch (`EQUAL_TO` for a single leftover value, `IS_ANY_OF` otherwise).
/// One field is factored per iteration — smallest intersection first, ties
/// broken by ascending field name — and the loop runs to a fixed point,
/// bounded by (distinct disjunctive fields × rules). Rules are never dropped
/// and semantics never change: `v ∈ V  ⇔  v ∈ I ∨ v ∈ V\I`.
pub(crate) fn factorize(rules: &mut [NormRule]) -> u32 {
    let bound = iteration_bound(rules);
    let mut factored = 0u32;

    for _ in 0..bound {
        if !factor_once(rules) {
            break;
        }
        factored += 1;
    }

    if factored > 0 {
        debug!(factored, "factorizer extracted common disjunction subsets");
    }
    factored
}

fn iteration_bound(rules: &[NormRule]) -> usize {
    let fields: usize = rules.iter().map(|r| r.disjunctions.len()).sum();
    fields.max(1) * rules.len().max(1)
}

/// Perform at most one rewrite. Returns false once no candidate remains.
fn factor_once(rules: &mut [NormRule]) -> bool {
    // Group rule indices by conjunct signature.
    let mut groups: HashMap<&[u32], Vec<usize>> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        groups.entry(rule.conjuncts.as_slice()).or_default().push(i);
    }

    // Best candidate across all groups: smallest intersection, then field
    // name, then first member index for full determinism.
    let mut best: Option<(Vec<u32>, String, Vec<usize>)> = None;
    for members in groups.values().filter(|m| m.len() >= 2) {
        for (field_name, intersection) in candidate_fields(rules, members) {
            let better = match &best {
                None => true,
                Some((b_int, b_name, b_members)) => {
                    (intersection.len(), &field_name, members[0])
                        < (b_int.len(), b_name, b_members[0])
                }
            };
            if better {
                best = Some((intersection, field_name, members.clone()));
            }
        }
    }

    let Some((intersection, field_name, member_idx)) = best else {
        return false;
    };

    for &i in &member_idx {
        let disj = rules[i]
            .disjunctions
            .iter_mut()
            .find(|d| d.field_name == field_name && !d.members.is_empty())
            .expect("candidate field must exist on every group member");

        let remainder: Vec<u32> = disj
            .members
            .iter()
            .copied()
            .filter(|v| intersection.binary_search(v).is_err())
            .collect();

        disj.members.clear();
        disj.atomic.push(AtomicBranch::Set(intersection.clone()));
        match remainder.len() {
            0 => {}
            1 => disj.atomic.push(AtomicBranch::Eq(remainder[0])),
            _ => disj.atomic.push(AtomicBranch::Set(remainder)),
        }
    }
    true
}

/// Fields eligible for factoring in a group: present as exactly one
/// unfactored disjunction on every member, with an intersection of at
/// least two values.
fn candidate_fields(rules: &[NormRule], members: &[usize]) -> Vec<(String, Vec<u32>)> {
    let first = &rules[members[0]];
    let mut out = Vec::new();

    'fields: for disj in first.disjunctions.iter().filter(|d| !d.members.is_empty()) {
        if first
            .disjunctions
            .iter()
            .filter(|d| d.field_id == disj.field_id)
            .count()
            != 1
        {
            continue;
        }
        let mut intersection = disj.members.clone();
        for &other in &members[1..] {
            let matching: Vec<_> = rules[other]
                .disjunctions
                .iter()
                .filter(|d| d.field_id == disj.field_id)
                .collect();
            let [single] = matching.as_slice() else {
                continue 'fields;
            };
            if single.members.is_empty() {
                continue 'fields;
            }
            intersection.retain(|v| single.members.binary_search(v).is_ok());
            if intersection.len() < 2 {
                continue 'fields;
            }
        }
        out.push((disj.field_name.clone(), intersection));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::Dictionary;
    use crate::ir::lower_rules;
    use crate::predicate::PredicateRegistry;
    use crate::rules::parse_ruleset;

    fn lowered(json: &str) -> (Vec<NormRule>, Dictionary) {
        let specs = parse_ruleset(json).unwrap();
        let mut fields = Dictionary::new();
        let mut values = Dictionary::new();
        let mut registry = PredicateRegistry::new();
        let rules = lower_rules(&specs, &mut fields, &mut values, &mut registry).unwrap();
        (rules, values)
    }

    #[test]
    fn shared_subset_is_extracted() {
        // R1: amount>10, country ∈ [US,CA,UK]; R2: amount>10, country ∈ [US,CA]
        let (mut rules, values) = lowered(
            r#"[
              {"rule_code": "R1", "conditions": [
                {"field": "amount", "operator": "GREATER_THAN", "value": 10},
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA", "UK"]}]},
              {"rule_code": "R2", "conditions": [
                {"field": "amount", "operator": "GREATER_THAN", "value": 10},
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]}]}
            ]"#,
        );
        assert_eq!(factorize(&mut rules), 1);

        let common: Vec<u32> = {
            let mut ids = vec![values.lookup("US").unwrap(), values.lookup("CA").unwrap()];
            ids.sort_unstable();
            ids
        };
        let uk = values.lookup("UK").unwrap();

        let d1 = &rules[0].disjunctions[0];
        assert!(d1.members.is_empty());
        assert_eq!(d1.atomic.len(), 2);
        assert!(matches!(&d1.atomic[0], AtomicBranch::Set(s) if *s == common));
        assert!(matches!(&d1.atomic[1], AtomicBranch::Eq(v) if *v == uk));

        let d2 = &rules[1].disjunctions[0];
        assert!(d2.members.is_empty());
        assert_eq!(d2.atomic.len(), 1);
        assert!(matches!(&d2.atomic[0], AtomicBranch::Set(s) if *s == common));
    }

    #[test]
    fn single_value_intersections_are_skipped() {
        // Intersection {US} has cardinality 1 — nothing to factor.
        let (mut rules, _) = lowered(
            r#"[
              {"rule_code": "B", "conditions": [
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]}]},
              {"rule_code": "C", "conditions": [
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "MX"]}]}
            ]"#,
        );
        assert_eq!(factorize(&mut rules), 0);
        assert!(!rules[0].disjunctions[0].members.is_empty());
    }

    #[test]
    fn different_signatures_do_not_group() {
        let (mut rules, _) = lowered(
            r#"[
              {"rule_code": "A", "conditions": [
                {"field": "amount", "operator": "GREATER_THAN", "value": 10},
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]}]},
              {"rule_code": "B", "conditions": [
                {"field": "amount", "operator": "GREATER_THAN", "value": 20},
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]}]}
            ]"#,
        );
        assert_eq!(factorize(&mut rules), 0);
    }

    #[test]
    fn smallest_intersection_factors_first() {
        // Two candidate fields; "city" has the smaller intersection (2 vs 3).
        let (mut rules, values) = lowered(
            r#"[
              {"rule_code": "A", "conditions": [
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA", "UK"]},
                {"field": "city", "operator": "IS_ANY_OF", "value": ["NYC", "LA", "SF"]}]},
              {"rule_code": "B", "conditions": [
                {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA", "UK"]},
                {"field": "city", "operator": "IS_ANY_OF", "value": ["NYC", "LA", "CHI"]}]}
            ]"#,
        );
        // First pass factors city; the loop then factors country too.
        assert_eq!(factorize(&mut rules), 2);
        for rule in &rules {
            for d in &rule.disjunctions {
                assert!(d.members.is_empty(), "all candidate fields factored");
            }
        }
        // city common set is {LA, NYC} by dictionary id order.
        let mut city_common = vec![values.lookup("NYC").unwrap(), values.lookup("LA").unwrap()];
        city_common.sort_unstable();
        let city = rules[0]
            .disjunctions
            .iter()
            .find(|d| d.field_name == "CITY")
            .unwrap();
        assert!(matches!(&city.atomic[0], AtomicBranch::Set(s) if *s == city_common));
    }
}
