pub mod cache;
mod context;
mod eligible;
mod encode;
mod engine;
pub mod error;
mod eval;
mod matcher;
mod metrics;
mod select;
mod types;

pub use cache::{BaseConditionCache, CacheKey, CacheMetricsSnapshot, InMemCache, NoopCache};
pub use context::detach_thread_context;
pub use encode::EncodedValue;
pub use engine::Engine;
pub use error::{EngineError, EngineReason, EngineResult};
pub use metrics::MetricsSnapshot;
pub use types::{Event, MatchResult, MatchedRule};
