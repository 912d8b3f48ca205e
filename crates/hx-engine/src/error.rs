use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum EngineReason {
    #[error("model integrity violation")]
    ModelCorrupt,
    #[error("cache backend failure")]
    CacheBackend,
    #[error("unsupported engine configuration")]
    Config,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for EngineReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::ModelCorrupt => 2001,
            Self::CacheBackend => 2002,
            Self::Config => 2003,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type EngineError = StructError<EngineReason>;
pub type EngineResult<T> = Result<T, EngineError>;
