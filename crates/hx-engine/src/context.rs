use std::cell::RefCell;
use std::collections::HashMap;

use crate::encode::EncodedValue;
use crate::types::MatchedRule;

// ---------------------------------------------------------------------------
// EvaluationContext — per-thread reusable scratch state
// ---------------------------------------------------------------------------

/// Reusable per-thread evaluation state, sized to the model on first use.
///
/// Never shared across threads. `reset` restores the post-construction
/// invariant (all counters zero, all collections empty) lazily: only the
/// counter slots touched by the previous evaluation are cleared.
pub struct EvaluationContext {
    pub(crate) model_id: u64,
    pub(crate) counters: Vec<u32>,
    pub(crate) touched: Vec<u32>,
    pub(crate) true_predicates: Vec<u32>,
    pub(crate) static_true: Vec<u32>,
    pub(crate) matches: Vec<MatchedRule>,
    pub(crate) present_fields: Vec<u32>,
    pub(crate) encoded: HashMap<u32, EncodedValue>,
    pub(crate) path_buf: String,
    pub(crate) predicates_evaluated: u64,
}

impl EvaluationContext {
    fn sized(model_id: u64, num_combinations: usize) -> Self {
        let touched_cap = (num_combinations / 10).min(1000).max(16);
        let match_cap = (num_combinations / 100).clamp(256, 1024);
        Self {
            model_id,
            counters: vec![0; num_combinations],
            touched: Vec::with_capacity(touched_cap),
            true_predicates: Vec::with_capacity(64),
            static_true: Vec::with_capacity(32),
            matches: Vec::with_capacity(match_cap),
            present_fields: Vec::with_capacity(32),
            encoded: HashMap::with_capacity(32),
            path_buf: String::with_capacity(64),
            predicates_evaluated: 0,
        }
    }

    /// Clear state left by the previous evaluation. Counters are zeroed via
    /// the touched list only — never a full array wipe.
    pub(crate) fn reset(&mut self) {
        for &c in &self.touched {
            if let Some(slot) = self.counters.get_mut(c as usize) {
                *slot = 0;
            }
        }
        self.touched.clear();
        self.true_predicates.clear();
        self.static_true.clear();
        self.matches.clear();
        self.present_fields.clear();
        self.encoded.clear();
        self.path_buf.clear();
        self.predicates_evaluated = 0;
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<Box<EvaluationContext>>> = const { RefCell::new(None) };
}

/// Run `f` with the calling thread's context, (re)sizing it when the thread
/// first evaluates or when the engine has swapped to a different model.
pub(crate) fn with_context<R>(
    model_id: u64,
    num_combinations: usize,
    f: impl FnOnce(&mut EvaluationContext) -> R,
) -> R {
    CONTEXT.with(|slot| {
        let mut borrow = slot.borrow_mut();
        let ctx = borrow.get_or_insert_with(|| Box::new(EvaluationContext::sized(model_id, num_combinations)));
        if ctx.model_id != model_id {
            **ctx = EvaluationContext::sized(model_id, num_combinations);
        }
        f(ctx)
    })
}

/// Release the calling thread's pooled context. Call before returning a
/// worker thread to its pool.
pub fn detach_thread_context() {
    CONTEXT.with(|slot| {
        slot.borrow_mut().take();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_fresh_state() {
        let mut ctx = EvaluationContext::sized(1, 100);
        ctx.counters[3] = 2;
        ctx.counters[97] = 1;
        ctx.touched.extend([3, 97]);
        ctx.true_predicates.push(5);
        ctx.predicates_evaluated = 9;
        ctx.reset();
        assert!(ctx.counters.iter().all(|&c| c == 0));
        assert!(ctx.touched.is_empty());
        assert!(ctx.true_predicates.is_empty());
        assert_eq!(ctx.predicates_evaluated, 0);
    }

    #[test]
    fn model_swap_resizes_thread_context() {
        with_context(1, 10, |ctx| assert_eq!(ctx.counters.len(), 10));
        with_context(2, 25, |ctx| assert_eq!(ctx.counters.len(), 25));
        detach_thread_context();
    }
}
