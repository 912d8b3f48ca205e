use crate::engine::EngineConfig;
use crate::types::CacheKind;

/// Internal validation, called automatically during `EngineConfig::from_str`
/// / `load`.
pub(crate) fn validate(config: &EngineConfig) -> anyhow::Result<()> {
    if config.engine.eligible_set_cache_size == 0 {
        anyhow::bail!("engine.eligible_set_cache_size must be > 0");
    }

    if config.engine.intersection_cardinality_threshold == 0 {
        anyhow::bail!("engine.intersection_cardinality_threshold must be > 0");
    }

    if config.cache.enabled && config.cache.kind != CacheKind::Noop {
        if config.cache.max_size == 0 {
            anyhow::bail!("cache.max_size must be > 0 when the cache is enabled");
        }
        if config.cache.ttl.as_duration().is_zero() {
            anyhow::bail!("cache.ttl must be > 0 when the cache is enabled");
        }
    }

    if config.logging.level.trim().is_empty() {
        anyhow::bail!("logging.level must be non-empty");
    }

    Ok(())
}
