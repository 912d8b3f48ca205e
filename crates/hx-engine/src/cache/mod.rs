mod inmem;
mod noop;

pub use inmem::InMemCache;
pub use noop::NoopCache;

use std::sync::Arc;
use std::time::Duration;

use roaring::RoaringBitmap;
use serde::Serialize;

use hx_config::{CacheConfig, CacheKind};
use orion_error::StructError;

use crate::error::{EngineReason, EngineResult};

// ---------------------------------------------------------------------------
// CacheKey — fixed-width composite key
// ---------------------------------------------------------------------------

/// Base-condition cache key: two 64-bit hashes, derived deterministically
/// from the model's base-set signatures and the event's projection on the
/// referenced static fields. Fixed-width so the hot path never allocates a
/// string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub hi: u64,
    pub lo: u64,
}

// ---------------------------------------------------------------------------
// BaseConditionCache — the backend seam
// ---------------------------------------------------------------------------

/// Base-condition cache backend. Implementations must be concurrent with
/// lock-free reads; `put` may complete asynchronously as long as it never
/// blocks the caller. A failing backend degrades to a miss — eviction and
/// errors never change evaluation semantics, only latency.
pub trait BaseConditionCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> EngineResult<Option<Arc<RoaringBitmap>>>;
    fn put(&self, key: CacheKey, bitmap: Arc<RoaringBitmap>, ttl: Duration) -> EngineResult<()>;
    fn invalidate(&self, key: &CacheKey) -> EngineResult<()>;
    /// Drop every entry; used on model swap.
    fn clear(&self);
    fn metrics(&self) -> CacheMetricsSnapshot;
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub expired: u64,
    pub evicted: u64,
    pub errors: u64,
    pub entries: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Build the configured backend. `external` has no in-process implementation:
/// the embedding application must pass its own via `Engine::with_cache`.
pub fn build_cache(config: &CacheConfig) -> EngineResult<Arc<dyn BaseConditionCache>> {
    match config.kind {
        CacheKind::Noop => Ok(Arc::new(NoopCache::new())),
        CacheKind::InMem => Ok(Arc::new(InMemCache::new(config.max_size))),
        CacheKind::External => Err(StructError::from(EngineReason::Config)),
    }
}
