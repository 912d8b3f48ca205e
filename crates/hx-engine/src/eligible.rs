use std::sync::Arc;

use dashmap::DashMap;
use roaring::RoaringBitmap;

use hx_compile::EngineModel;

use crate::cache::CacheKey;

// ---------------------------------------------------------------------------
// Eligible-predicate-set cache — model-lifetime, bounded
// ---------------------------------------------------------------------------

/// Cache of eligible-bitmap → union-of-predicate-ids, keyed by the same
/// composite key as the base-condition cache (identical keys imply identical
/// eligibility bitmaps). Bounded: reaching capacity drops the whole map —
/// entries are cheap to rebuild and correctness never depends on residency.
pub(crate) struct EligibleSetCache {
    sets: DashMap<CacheKey, Arc<RoaringBitmap>>,
    capacity: usize,
}

impl EligibleSetCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            sets: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Fetch the eligible predicate set for a bitmap, building it on first
    /// sight. Returns `(set, rebuilt)`.
    pub(crate) fn get_or_build(
        &self,
        key: CacheKey,
        model: &EngineModel,
        eligible: &RoaringBitmap,
    ) -> (Arc<RoaringBitmap>, bool) {
        if let Some(found) = self.sets.get(&key) {
            return (found.value().clone(), false);
        }
        let mut union = RoaringBitmap::new();
        for combo in eligible.iter() {
            if let Some(ids) = model.predicate_ids.get(combo as usize) {
                for &pid in ids {
                    union.insert(pid);
                }
            }
        }
        let set = Arc::new(union);
        if self.sets.len() >= self.capacity {
            self.sets.clear();
        }
        self.sets.insert(key, set.clone());
        (set, true)
    }

    pub(crate) fn clear(&self) {
        self.sets.clear();
    }
}
