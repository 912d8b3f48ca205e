use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use roaring::RoaringBitmap;

use crate::error::EngineResult;

use super::{BaseConditionCache, CacheKey, CacheMetricsSnapshot};

/// Cache that never stores anything. The base filter is recomputed per event;
/// results are identical to any other backend, only slower.
#[derive(Debug, Default)]
pub struct NoopCache {
    misses: AtomicU64,
}

impl NoopCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaseConditionCache for NoopCache {
    fn get(&self, _key: &CacheKey) -> EngineResult<Option<Arc<RoaringBitmap>>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn put(&self, _key: CacheKey, _bitmap: Arc<RoaringBitmap>, _ttl: Duration) -> EngineResult<()> {
        Ok(())
    }

    fn invalidate(&self, _key: &CacheKey) -> EngineResult<()> {
        Ok(())
    }

    fn clear(&self) {}

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            misses: self.misses.load(Ordering::Relaxed),
            ..CacheMetricsSnapshot::default()
        }
    }
}
