pub mod engine;
pub mod logging;
pub mod types;
pub mod validate;

pub use engine::{CacheConfig, EngineConfig, EvalConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use types::{ByteSize, CacheKind, HumanDuration, SelectionStrategy};
