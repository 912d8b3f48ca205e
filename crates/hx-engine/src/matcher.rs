use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use roaring::RoaringBitmap;

use hx_compile::EngineModel;
use orion_error::StructError;

use crate::context::{self, EvaluationContext};
use crate::encode;
use crate::engine::Engine;
use crate::error::{EngineReason, EngineResult};
use crate::eval;
use crate::select;
use crate::types::{Event, MatchResult, MatchedRule};

// ---------------------------------------------------------------------------
// Counter-based matcher — the per-event hot path
// ---------------------------------------------------------------------------

/// Drive one event through the evaluation state machine:
///
/// `Acquire → Reset → Encode → BaseFilter → Evaluate → Count → Detect →
/// Select → Emit → Release`.
///
/// `Reset` guarantees independence across events even on the same thread.
pub(crate) fn run(engine: &Engine, event: &Event) -> EngineResult<MatchResult> {
    let started = Instant::now();
    let model: &EngineModel = engine.model();
    let metrics = engine.metrics();
    metrics.events_total.fetch_add(1, Ordering::Relaxed);

    let num_combinations = model.num_combinations() as usize;
    context::with_context(engine.model_id(), num_combinations, |ctx| {
        ctx.reset();
        encode::encode_event(model, event, ctx, metrics);

        let eligible = if engine.base_filter_enabled() {
            Some(engine.base_filter(ctx)?)
        } else {
            None
        };

        // An empty eligible bitmap short-circuits straight to selection.
        let dead_on_arrival = matches!(&eligible, Some((_, bitmap)) if bitmap.is_empty());
        if !dead_on_arrival {
            let filter: Option<Arc<RoaringBitmap>> = eligible.as_ref().map(|(key, bitmap)| {
                let (set, rebuilt) = engine.eligible_sets().get_or_build(*key, model, bitmap);
                if rebuilt {
                    metrics.eligible_set_rebuilds_total.fetch_add(1, Ordering::Relaxed);
                }
                set
            });

            evaluate_fields(model, ctx, filter.as_deref());
            count_postings(
                model,
                ctx,
                eligible.as_ref().map(|(_, bitmap)| bitmap.as_ref()),
                engine.intersection_threshold(),
            )?;
            detect(model, ctx);
        }

        select::apply(model.selection, &mut ctx.matches);

        metrics
            .matches_total
            .fetch_add(ctx.matches.len() as u64, Ordering::Relaxed);
        metrics
            .predicates_evaluated_total
            .fetch_add(ctx.predicates_evaluated, Ordering::Relaxed);

        Ok(MatchResult {
            event_id: event.event_id.clone(),
            matched_rules: ctx.matches.clone(),
            evaluation_time_nanos: started.elapsed().as_nanos() as u64,
            predicates_evaluated: ctx.predicates_evaluated,
            rules_matched: ctx.matches.len() as u32,
        })
    })
}

/// Evaluate the predicates of every field the event mentions — cheapest
/// first-touch field first — then the null-check predicates of fields the
/// event omits.
fn evaluate_fields(model: &EngineModel, ctx: &mut EvaluationContext, filter: Option<&RoaringBitmap>) {
    let weights = &model.field_min_weight;
    ctx.present_fields.sort_unstable_by(|a, b| {
        let wa = weights.get(a).copied().unwrap_or(f32::MAX);
        let wb = weights.get(b).copied().unwrap_or(f32::MAX);
        wa.total_cmp(&wb).then(a.cmp(b))
    });

    let EvaluationContext {
        encoded,
        present_fields,
        true_predicates,
        predicates_evaluated,
        ..
    } = ctx;

    for field in present_fields.iter() {
        if let Some(pids) = model.field_predicates.get(field) {
            eval::evaluate_predicates(
                model,
                pids,
                encoded.get(field),
                filter,
                true_predicates,
                predicates_evaluated,
            );
        }
    }

    for (field, pids) in &model.null_predicates {
        if !encoded.contains_key(field) {
            eval::evaluate_predicates(model, pids, None, filter, true_predicates, predicates_evaluated);
        }
    }
}

/// Walk the postings of every true predicate, incrementing per-combination
/// counters. Short postings probe the eligibility bitmap per element; long
/// ones are intersected with it first.
fn count_postings(
    model: &EngineModel,
    ctx: &mut EvaluationContext,
    eligible: Option<&RoaringBitmap>,
    threshold: u64,
) -> EngineResult<()> {
    let EvaluationContext {
        counters,
        touched,
        true_predicates,
        ..
    } = ctx;

    for &pid in true_predicates.iter() {
        let Some(posting) = model.postings.get(pid as usize) else {
            return Err(StructError::from(EngineReason::ModelCorrupt));
        };
        if posting.is_empty() {
            // Dead predicate: referenced by no surviving combination.
            continue;
        }
        match eligible {
            None => {
                for combo in posting {
                    bump(counters, touched, combo)?;
                }
            }
            Some(eligible) if posting.len() < threshold => {
                for combo in posting {
                    if eligible.contains(combo) {
                        bump(counters, touched, combo)?;
                    }
                }
            }
            Some(eligible) => {
                for combo in &(posting & eligible) {
                    bump(counters, touched, combo)?;
                }
            }
        }
    }
    Ok(())
}

#[inline]
fn bump(counters: &mut [u32], touched: &mut Vec<u32>, combo: u32) -> EngineResult<()> {
    let Some(slot) = counters.get_mut(combo as usize) else {
        return Err(StructError::from(EngineReason::ModelCorrupt));
    };
    if *slot == 0 {
        touched.push(combo);
    }
    *slot += 1;
    Ok(())
}

/// Emit a match for every rule bound to a combination whose counter reached
/// its predicate count. Touched combinations are visited in ascending id
/// order, which fixes the emission order.
fn detect(model: &EngineModel, ctx: &mut EvaluationContext) {
    ctx.touched.sort_unstable();
    let EvaluationContext {
        touched,
        counters,
        matches,
        ..
    } = ctx;

    for &combo in touched.iter() {
        let idx = combo as usize;
        debug_assert!(counters[idx] <= model.predicate_count[idx]);
        if counters[idx] == model.predicate_count[idx] {
            for binding in &model.all_rules[idx] {
                matches.push(MatchedRule {
                    combination_id: combo,
                    rule_code: binding.code.clone(),
                    priority: binding.priority,
                    description: binding.description.clone(),
                });
            }
        }
    }
}
