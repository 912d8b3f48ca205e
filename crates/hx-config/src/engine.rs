use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::types::{ByteSize, CacheKind, HumanDuration, SelectionStrategy};
use crate::validate;

// ---------------------------------------------------------------------------
// EngineConfig — top-level `helios.toml`
// ---------------------------------------------------------------------------

/// Root configuration for the Helios engine.
///
/// Every section has defaults, so an empty file (or no file at all) yields a
/// working configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EvalConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        Self::from_str(&text)
    }

    /// Parse and validate a configuration from TOML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// EvalConfig — `[engine]`
// ---------------------------------------------------------------------------

/// Evaluation options consumed by the compiler and the matcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Capacity of the model-lifetime eligible-predicate-set cache.
    pub eligible_set_cache_size: usize,
    /// Posting-walk strategy cut-over: postings shorter than this are probed
    /// element-by-element, longer ones are intersected with the eligibility
    /// bitmap first.
    pub intersection_cardinality_threshold: usize,
    /// Field names (matched case-insensitively) excluded from base-condition
    /// extraction on top of the built-in dynamic set.
    pub dynamic_fields: Vec<String>,
    /// Match selection policy.
    pub selection: SelectionStrategy,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eligible_set_cache_size: 10_000,
            intersection_cardinality_threshold: 128,
            dynamic_fields: Vec::new(),
            selection: SelectionStrategy::AllMatches,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheConfig — `[cache]`
// ---------------------------------------------------------------------------

/// Base-condition cache options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend selector. `external` requires the embedding application to
    /// supply a backend; the CLI rejects it.
    pub kind: CacheKind,
    /// Master switch. When false the evaluator recomputes the base filter
    /// for every event.
    pub enabled: bool,
    /// Entry limit before LRU eviction kicks in.
    pub max_size: usize,
    /// Entry time-to-live.
    pub ttl: HumanDuration,
    /// External backends compress payloads above this size before the wire.
    /// The in-memory cache shares bitmaps by reference and ignores it.
    pub compression_threshold: ByteSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::InMem,
            enabled: true,
            max_size: 65_536,
            ttl: Duration::from_secs(300).into(),
            compression_threshold: ByteSize::from(8 * 1024),
        }
    }
}
