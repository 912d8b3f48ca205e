use std::collections::HashMap;

use roaring::RoaringBitmap;
use serde::Serialize;

use hx_config::SelectionStrategy;

use crate::basecond::BaseConditionSet;
use crate::combine::CombinationDraft;
use crate::dict::Dictionary;
use crate::error::{CompileError, CompileResult};
use crate::predicate::{Operator, Predicate};

// ---------------------------------------------------------------------------
// RuleBinding — one logical rule bound to a combination
// ---------------------------------------------------------------------------

/// `(rule code, priority, description)` of a logical rule sharing a
/// combination. Order within a combination is compile-time insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleBinding {
    pub code: String,
    pub priority: i32,
    pub description: String,
}

// ---------------------------------------------------------------------------
// CompileStats
// ---------------------------------------------------------------------------

/// Compilation statistics, carried on the model and shown by the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileStats {
    pub rules_total: u32,
    pub rules_disabled: u32,
    /// Rules whose combinations were all contradictory.
    pub dead_rules: Vec<String>,
    pub predicates: u32,
    pub combinations: u32,
    pub contradictions_dropped: u32,
    /// Rule bindings merged into an existing combination by deduplication.
    pub duplicate_bindings: u32,
    pub factored_fields: u32,
    pub base_sets: u32,
}

// ---------------------------------------------------------------------------
// EngineModel — the compiled artifact
// ---------------------------------------------------------------------------

/// The execution-optimized, immutable compiled ruleset.
///
/// Combination tables use an SoA layout so the match-detection sweep touches
/// adjacent `predicate_count` / `priority` entries. All arrays are sized
/// exactly at construction; the model is shared across evaluator threads via
/// `Arc` and is never mutated afterwards.
#[derive(Debug)]
pub struct EngineModel {
    pub fields: Dictionary,
    pub values: Dictionary,

    /// Predicate table indexed by predicate id.
    pub predicates: Vec<Predicate>,
    /// Inverted index: predicate id → combinations containing it. Dead
    /// predicates (dropped combinations) simply have empty postings.
    pub postings: Vec<RoaringBitmap>,

    // SoA combination tables, indexed by combination id.
    pub predicate_count: Vec<u32>,
    pub priority: Vec<i32>,
    pub rule_code: Vec<String>,
    pub predicate_ids: Vec<Vec<u32>>,
    pub all_rules: Vec<Vec<RuleBinding>>,

    /// Per-field predicate ids, grouped by operator then ascending weight so
    /// same-operator inner loops stay branch-friendly.
    pub field_predicates: HashMap<u32, Vec<u32>>,
    /// Fields carrying IS_NULL / IS_NOT_NULL predicates; these must be
    /// checked even when the event does not mention the field.
    pub null_predicates: HashMap<u32, Vec<u32>>,
    /// All predicate ids sorted by ascending weight.
    pub sorted_by_weight: Vec<u32>,
    /// First-touch field ordering for the evaluator.
    pub field_min_weight: HashMap<u32, f32>,

    // Reverse lookups.
    pub combos_by_code: HashMap<String, RoaringBitmap>,
    pub codes_by_predicate: Vec<Vec<String>>,

    pub base_sets: Vec<BaseConditionSet>,
    /// Combinations with no static signature — eligible for every event.
    pub always_eligible: RoaringBitmap,

    pub selection: SelectionStrategy,
    pub dynamic_fields: Vec<String>,
    pub stats: CompileStats,
}

impl EngineModel {
    /// Assemble a model from its primary parts, building every derived
    /// table. The codec calls this too, so a deserialized model shares the
    /// construction path of a freshly compiled one.
    pub(crate) fn from_parts(
        fields: Dictionary,
        values: Dictionary,
        predicates: Vec<Predicate>,
        drafts: Vec<CombinationDraft>,
        postings: Vec<RoaringBitmap>,
        base_sets: Vec<BaseConditionSet>,
        selection: SelectionStrategy,
        dynamic_fields: Vec<String>,
        stats: CompileStats,
    ) -> CompileResult<Self> {
        if postings.len() != predicates.len() {
            return Err(CompileError::InternalInvariant(format!(
                "postings table has {} entries for {} predicates",
                postings.len(),
                predicates.len()
            )));
        }

        let n = drafts.len();
        let mut predicate_count = Vec::with_capacity(n);
        let mut priority = Vec::with_capacity(n);
        let mut rule_code = Vec::with_capacity(n);
        let mut predicate_ids = Vec::with_capacity(n);
        let mut all_rules = Vec::with_capacity(n);
        let mut combos_by_code: HashMap<String, RoaringBitmap> = HashMap::new();
        let mut codes_by_predicate: Vec<Vec<String>> = vec![Vec::new(); predicates.len()];

        for (combo_id, draft) in drafts.into_iter().enumerate() {
            if draft.predicate_ids.is_empty() || draft.rules.is_empty() {
                return Err(CompileError::InternalInvariant(format!(
                    "combination {combo_id} is empty"
                )));
            }
            if !draft.predicate_ids.is_sorted() {
                return Err(CompileError::InternalInvariant(format!(
                    "combination {combo_id} predicate ids are not canonical"
                )));
            }
            for binding in &draft.rules {
                combos_by_code
                    .entry(binding.code.clone())
                    .or_default()
                    .insert(combo_id as u32);
            }
            for &pid in &draft.predicate_ids {
                let codes = codes_by_predicate.get_mut(pid as usize).ok_or_else(|| {
                    CompileError::InternalInvariant(format!(
                        "combination {combo_id} references unknown predicate {pid}"
                    ))
                })?;
                for binding in &draft.rules {
                    if !codes.contains(&binding.code) {
                        codes.push(binding.code.clone());
                    }
                }
            }

            predicate_count.push(draft.predicate_ids.len() as u32);
            priority.push(draft.rules[0].priority);
            rule_code.push(draft.rules[0].code.clone());
            predicate_ids.push(draft.predicate_ids);
            all_rules.push(draft.rules);
        }

        let mut field_predicates: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut null_predicates: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut field_min_weight: HashMap<u32, f32> = HashMap::new();
        for p in &predicates {
            field_predicates.entry(p.field_id).or_default().push(p.id);
            if matches!(p.op, Operator::IsNull | Operator::IsNotNull) {
                null_predicates.entry(p.field_id).or_default().push(p.id);
            }
            field_min_weight
                .entry(p.field_id)
                .and_modify(|w| *w = w.min(p.weight))
                .or_insert(p.weight);
        }
        for ids in field_predicates.values_mut() {
            ids.sort_unstable_by(|&a, &b| {
                let (pa, pb) = (&predicates[a as usize], &predicates[b as usize]);
                (pa.op.ordinal(), pa.weight, a).partial_cmp(&(pb.op.ordinal(), pb.weight, b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let mut sorted_by_weight: Vec<u32> = (0..predicates.len() as u32).collect();
        sorted_by_weight.sort_unstable_by(|&a, &b| {
            predicates[a as usize]
                .weight
                .total_cmp(&predicates[b as usize].weight)
                .then(a.cmp(&b))
        });

        let mut always_eligible = RoaringBitmap::new();
        always_eligible.insert_range(0..n as u32);
        for set in &base_sets {
            always_eligible -= &set.affected;
        }

        Ok(Self {
            fields,
            values,
            predicates,
            postings,
            predicate_count,
            priority,
            rule_code,
            predicate_ids,
            all_rules,
            field_predicates,
            null_predicates,
            sorted_by_weight,
            field_min_weight,
            combos_by_code,
            codes_by_predicate,
            base_sets,
            always_eligible,
            selection,
            dynamic_fields,
            stats,
        })
    }

    pub fn num_combinations(&self) -> u32 {
        self.predicate_count.len() as u32
    }

    /// Fraction of statically-anchored combinations folded away by
    /// base-condition grouping.
    pub fn base_reduction(&self) -> f32 {
        let anchored: u64 = self.base_sets.iter().map(|s| s.affected.len()).sum();
        if anchored == 0 {
            return 0.0;
        }
        1.0 - self.base_sets.len() as f32 / anchored as f32
    }
}

/// Build the inverted index for a draft set.
pub(crate) fn build_postings(drafts: &[CombinationDraft], num_predicates: usize) -> Vec<RoaringBitmap> {
    let mut postings = vec![RoaringBitmap::new(); num_predicates];
    for (combo_id, draft) in drafts.iter().enumerate() {
        for &pid in &draft.predicate_ids {
            if let Some(bitmap) = postings.get_mut(pid as usize) {
                bitmap.insert(combo_id as u32);
            }
        }
    }
    postings
}
