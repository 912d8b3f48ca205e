use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use roaring::RoaringBitmap;

use crate::error::EngineResult;

use super::{BaseConditionCache, CacheKey, CacheMetricsSnapshot};

// ---------------------------------------------------------------------------
// InMemCache — concurrent TTL + LRU cache
// ---------------------------------------------------------------------------

struct Entry {
    bitmap: Arc<RoaringBitmap>,
    expires_at: Instant,
    /// Last-access tick, updated on every hit for LRU ordering.
    stamp: AtomicU64,
}

/// In-process base-condition cache.
///
/// Reads go through a sharded concurrent map and never block on eviction.
/// Writes are plain insert-or-replace. Eviction — expired entries first,
/// then least-recently-used down to capacity — is serialized by a mutex that
/// contending writers simply skip, so no caller ever waits on a sweep.
pub struct InMemCache {
    entries: DashMap<CacheKey, Entry>,
    capacity: usize,
    tick: AtomicU64,
    sweep_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl InMemCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            tick: AtomicU64::new(0),
            sweep_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn sweep(&self) {
        // Another thread already sweeping is good enough.
        let Some(_guard) = self.sweep_lock.try_lock() else {
            return;
        };

        let now = Instant::now();
        let mut dead: Vec<CacheKey> = Vec::new();
        for entry in self.entries.iter() {
            if entry.value().expires_at <= now {
                dead.push(*entry.key());
            }
        }
        for key in &dead {
            if self.entries.remove(key).is_some() {
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
        }

        let over = self.entries.len().saturating_sub(self.capacity);
        if over == 0 {
            return;
        }
        let mut stamped: Vec<(u64, CacheKey)> = self
            .entries
            .iter()
            .map(|e| (e.value().stamp.load(Ordering::Relaxed), *e.key()))
            .collect();
        stamped.sort_unstable();
        for (_, key) in stamped.into_iter().take(over) {
            if self.entries.remove(&key).is_some() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl BaseConditionCache for InMemCache {
    fn get(&self, key: &CacheKey) -> EngineResult<Option<Arc<RoaringBitmap>>> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.value().expires_at > Instant::now() {
                    entry.value().stamp.store(tick, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value().bitmap.clone()));
                }
                true
            }
            None => false,
        };
        if expired && self.entries.remove(key).is_some() {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn put(&self, key: CacheKey, bitmap: Arc<RoaringBitmap>, ttl: Duration) -> EngineResult<()> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            Entry {
                bitmap,
                expires_at: Instant::now() + ttl,
                stamp: AtomicU64::new(tick),
            },
        );
        if self.entries.len() > self.capacity {
            self.sweep();
        }
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> EngineResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            errors: 0,
            entries: self.entries.len() as u64,
        }
    }
}
