use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use roaring::RoaringBitmap;
use tracing::warn;

use hx_compile::{EngineModel, FNV_OFFSET, fnv1a};
use hx_config::EngineConfig;
use orion_error::StructError;

use crate::cache::{BaseConditionCache, CacheKey, build_cache};
use crate::context::EvaluationContext;
use crate::eligible::EligibleSetCache;
use crate::encode::EncodedValue;
use crate::error::{EngineReason, EngineResult};
use crate::eval;
use crate::matcher;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::types::{Event, MatchResult};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Evaluation options frozen at construction.
#[derive(Debug, Clone, Copy)]
struct Options {
    cache_enabled: bool,
    intersection_threshold: u64,
    eligible_cache_capacity: usize,
    ttl: Duration,
}

/// Static-predicate bookkeeping derived from one model.
struct ModelView {
    model: Arc<EngineModel>,
    /// Fields referenced by any base-set static predicate, sorted.
    static_fields: Vec<u32>,
    /// Every static predicate id, as the filter for the miss path.
    static_predicates: RoaringBitmap,
    /// Model-identity half of the cache key.
    base_seed: u64,
    model_id: u64,
}

impl ModelView {
    fn build(model: Arc<EngineModel>) -> EngineResult<Self> {
        validate_model(&model)?;
        let mut static_predicates = RoaringBitmap::new();
        let mut static_fields: Vec<u32> = Vec::new();
        let mut base_seed = FNV_OFFSET;
        for set in &model.base_sets {
            base_seed = fnv1a(base_seed, &set.canonical_hash.to_le_bytes());
            for &pid in &set.static_predicate_ids {
                static_predicates.insert(pid);
                if let Some(p) = model.predicates.get(pid as usize) {
                    static_fields.push(p.field_id);
                }
            }
        }
        base_seed = fnv1a(base_seed, &model.num_combinations().to_le_bytes());
        static_fields.sort_unstable();
        static_fields.dedup();
        Ok(Self {
            model,
            static_fields,
            static_predicates,
            base_seed,
            model_id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine — evaluator facade
// ---------------------------------------------------------------------------

/// The evaluator: an immutable shared model plus the model-lifetime caches
/// and metrics. `evaluate` is safe to call from any number of threads
/// concurrently; all per-event mutable state lives in the thread-local
/// [`EvaluationContext`].
pub struct Engine {
    view: ModelView,
    options: Options,
    cache: Arc<dyn BaseConditionCache>,
    eligible_sets: EligibleSetCache,
    metrics: EngineMetrics,
}

impl Engine {
    /// Build an engine with the backend selected by `config.cache.kind`.
    /// The `external` kind requires [`Engine::with_cache`].
    pub fn new(model: Arc<EngineModel>, config: &EngineConfig) -> EngineResult<Self> {
        let cache = build_cache(&config.cache)?;
        Self::with_cache(model, config, cache)
    }

    /// Build an engine around a caller-supplied cache backend.
    pub fn with_cache(
        model: Arc<EngineModel>,
        config: &EngineConfig,
        cache: Arc<dyn BaseConditionCache>,
    ) -> EngineResult<Self> {
        let options = Options {
            cache_enabled: config.cache.enabled,
            intersection_threshold: config.engine.intersection_cardinality_threshold as u64,
            eligible_cache_capacity: config.engine.eligible_set_cache_size,
            ttl: config.cache.ttl.as_duration(),
        };
        Ok(Self {
            view: ModelView::build(model)?,
            eligible_sets: EligibleSetCache::new(options.eligible_cache_capacity),
            options,
            cache,
            metrics: EngineMetrics::default(),
        })
    }

    /// Evaluate one event, returning every rule whose conditions it
    /// satisfies (after the model's selection policy).
    ///
    /// Runtime anomalies (cache failures, encoding misses) are absorbed into
    /// metrics; the only fatal error is model corruption.
    pub fn evaluate(&self, event: &Event) -> EngineResult<MatchResult> {
        matcher::run(self, event)
    }

    /// Swap in a newly compiled (hot-reloaded) model. Per-thread contexts
    /// detect the new model identity and re-size lazily; both caches start
    /// cold.
    pub fn swap_model(&mut self, model: Arc<EngineModel>) -> EngineResult<()> {
        self.view = ModelView::build(model)?;
        self.cache.clear();
        self.eligible_sets.clear();
        Ok(())
    }

    pub fn model(&self) -> &Arc<EngineModel> {
        &self.view.model
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.metrics())
    }

    pub(crate) fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub(crate) fn eligible_sets(&self) -> &EligibleSetCache {
        &self.eligible_sets
    }

    pub(crate) fn model_id(&self) -> u64 {
        self.view.model_id
    }

    pub(crate) fn base_filter_enabled(&self) -> bool {
        self.options.cache_enabled && !self.view.model.base_sets.is_empty()
    }

    pub(crate) fn intersection_threshold(&self) -> u64 {
        self.options.intersection_threshold
    }

    // -----------------------------------------------------------------------
    // Base-condition filter
    // -----------------------------------------------------------------------

    /// Resolve the eligible-combination bitmap for the encoded event:
    /// cache hit, or recompute from the static predicates and store.
    pub(crate) fn base_filter(
        &self,
        ctx: &mut EvaluationContext,
    ) -> EngineResult<(CacheKey, Arc<RoaringBitmap>)> {
        let key = self.derive_key(ctx);

        match self.cache.get(&key) {
            Ok(Some(bitmap)) => return Ok((key, bitmap)),
            Ok(None) => {}
            // Backend failure degrades to a miss; evaluation proceeds.
            Err(e) => warn!(error = %e, "base-condition cache get failed, recomputing"),
        }

        self.metrics
            .base_filter_computed_total
            .fetch_add(1, Ordering::Relaxed);

        let model = self.view.model.as_ref();
        let EvaluationContext {
            encoded,
            static_true,
            predicates_evaluated,
            ..
        } = ctx;
        static_true.clear();
        for &field in &self.view.static_fields {
            let Some(value) = encoded.get(&field) else {
                continue;
            };
            if let Some(pids) = model.field_predicates.get(&field) {
                eval::evaluate_predicates(
                    model,
                    pids,
                    Some(value),
                    Some(&self.view.static_predicates),
                    static_true,
                    predicates_evaluated,
                );
            }
        }
        static_true.sort_unstable();

        let mut bitmap = model.always_eligible.clone();
        for set in &model.base_sets {
            if set
                .static_predicate_ids
                .iter()
                .all(|id| static_true.binary_search(id).is_ok())
            {
                bitmap |= &set.affected;
            }
        }

        let bitmap = Arc::new(bitmap);
        if let Err(e) = self.cache.put(key, bitmap.clone(), self.options.ttl) {
            warn!(error = %e, "base-condition cache put failed");
        }
        Ok((key, bitmap))
    }

    /// Deterministic fixed-width key: model half from the base-set hashes,
    /// event half from the projection on the static fields.
    fn derive_key(&self, ctx: &EvaluationContext) -> CacheKey {
        let mut lo = FNV_OFFSET;
        for &field in &self.view.static_fields {
            lo = fnv1a(lo, &field.to_le_bytes());
            match ctx.encoded.get(&field) {
                None => lo = fnv1a(lo, &[0]),
                Some(value) => lo = hash_encoded(lo, value),
            }
        }
        CacheKey {
            hi: self.view.base_seed,
            lo,
        }
    }
}

fn hash_encoded(mut h: u64, value: &EncodedValue) -> u64 {
    match value {
        EncodedValue::Num { value, id } => {
            h = fnv1a(h, &[2]);
            h = fnv1a(h, &value.to_bits().to_le_bytes());
            h = hash_id(h, *id);
        }
        EncodedValue::Bool { value, id } => {
            h = fnv1a(h, &[3, *value as u8]);
            h = hash_id(h, *id);
        }
        EncodedValue::Str { text, id } => {
            h = fnv1a(h, &[4]);
            h = fnv1a(h, text.as_bytes());
            h = hash_id(h, *id);
        }
        EncodedValue::Array(items) => {
            h = fnv1a(h, &[5]);
            for item in items {
                h = hash_encoded(h, item);
            }
            h = fnv1a(h, &[6]);
        }
    }
    h
}

fn hash_id(h: u64, id: Option<u32>) -> u64 {
    match id {
        Some(id) => fnv1a(h, &id.to_le_bytes()),
        None => fnv1a(h, &[0xff]),
    }
}

/// Cheap structural integrity check; a model that fails it is unusable.
fn validate_model(model: &EngineModel) -> EngineResult<()> {
    let n = model.predicate_count.len();
    let consistent = model.priority.len() == n
        && model.rule_code.len() == n
        && model.predicate_ids.len() == n
        && model.all_rules.len() == n
        && model.postings.len() == model.predicates.len();
    if !consistent {
        return Err(StructError::from(EngineReason::ModelCorrupt));
    }
    Ok(())
}
