use std::collections::{HashMap, HashSet};

use roaring::RoaringBitmap;

use crate::combine::CombinationDraft;
use crate::dict::Dictionary;
use crate::predicate::{FNV_OFFSET, Operator, Predicate, fnv1a, value_hash};

// ---------------------------------------------------------------------------
// Base-condition extraction — static sub-signature grouping
// ---------------------------------------------------------------------------

/// Field names whose values change per request and therefore never anchor a
/// cacheable base condition.
pub const DYNAMIC_BUILTIN: &[&str] = &[
    "TIMESTAMP",
    "RANDOM",
    "SESSION_ID",
    "REQUEST_ID",
    "CORRELATION_ID",
];

/// A group of combinations sharing one static predicate sub-signature.
///
/// Two sets with equal `static_predicate_ids` share a `set_id`; the canonical
/// hash is deterministic (FNV-1a over the sorted ids plus each predicate's
/// field id, operator ordinal, and type-specific value hash) and unique
/// within a model — genuine hash collisions between distinct signatures are
/// resolved by rehashing with an alternate prime.
#[derive(Debug, Clone)]
pub struct BaseConditionSet {
    pub set_id: u32,
    pub static_predicate_ids: Vec<u32>,
    pub canonical_hash: u64,
    pub affected: RoaringBitmap,
    pub avg_selectivity: f32,
}

/// A predicate is static iff it is EQUAL_TO or IS_ANY_OF on a non-dynamic
/// field.
pub fn is_static(p: &Predicate, fields: &Dictionary, dynamic: &HashSet<String>) -> bool {
    if !matches!(p.op, Operator::EqualTo | Operator::IsAnyOf) {
        return false;
    }
    match fields.decode(p.field_id) {
        Some(name) => !dynamic.contains(name),
        None => false,
    }
}

/// Build the dynamic-field set: built-ins plus the configured names,
/// uppercased.
pub fn dynamic_field_set(configured: &[String]) -> HashSet<String> {
    DYNAMIC_BUILTIN
        .iter()
        .map(|s| (*s).to_string())
        .chain(configured.iter().map(|s| s.trim().to_ascii_uppercase()))
        .collect()
}

/// Group combinations by their static sub-signature.
pub(crate) fn extract_base_sets(
    drafts: &[CombinationDraft],
    predicates: &[Predicate],
    fields: &Dictionary,
    dynamic: &HashSet<String>,
) -> Vec<BaseConditionSet> {
    let mut by_signature: HashMap<Vec<u32>, usize> = HashMap::new();
    let mut sets: Vec<BaseConditionSet> = Vec::new();
    let mut used_hashes: HashMap<u64, usize> = HashMap::new();

    for (combo_id, draft) in drafts.iter().enumerate() {
        let signature: Vec<u32> = draft
            .predicate_ids
            .iter()
            .copied()
            .filter(|&id| {
                predicates
                    .get(id as usize)
                    .is_some_and(|p| is_static(p, fields, dynamic))
            })
            .collect();
        if signature.is_empty() {
            continue;
        }

        let index = *by_signature.entry(signature.clone()).or_insert_with(|| {
            let mut hash = canonical_hash(&signature, predicates);
            // Equal signatures always share a slot above, so a taken hash
            // here is a true collision between distinct signatures.
            while used_hashes.contains_key(&hash) {
                hash = rehash(hash);
            }
            used_hashes.insert(hash, sets.len());
            let avg = signature
                .iter()
                .filter_map(|&id| predicates.get(id as usize))
                .map(|p| p.selectivity)
                .sum::<f32>()
                / signature.len() as f32;
            sets.push(BaseConditionSet {
                set_id: sets.len() as u32,
                static_predicate_ids: signature,
                canonical_hash: hash,
                affected: RoaringBitmap::new(),
                avg_selectivity: avg,
            });
            sets.len() - 1
        });
        sets[index].affected.insert(combo_id as u32);
    }

    sets
}

fn canonical_hash(signature: &[u32], predicates: &[Predicate]) -> u64 {
    let mut h = FNV_OFFSET;
    for &id in signature {
        h = fnv1a(h, &id.to_le_bytes());
        if let Some(p) = predicates.get(id as usize) {
            h = fnv1a(h, &p.field_id.to_le_bytes());
            h = fnv1a(h, &[p.op.ordinal()]);
            h = fnv1a(h, &value_hash(&p.value).to_le_bytes());
        }
    }
    h
}

// 2^64 - 59, the largest 64-bit prime.
const ALT_PRIME: u64 = 0xffff_ffff_ffff_ffc5;

fn rehash(h: u64) -> u64 {
    let mut out = FNV_OFFSET;
    for b in h.to_le_bytes() {
        out ^= b as u64;
        out = out.wrapping_mul(ALT_PRIME);
    }
    out
}
