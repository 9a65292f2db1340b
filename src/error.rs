use std::path::PathBuf;

/// Stable classification tag for an [`EngineError`], independent of the
/// human-readable message. Callers should match on this rather than on
/// error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    IoFailure,
    StateCorruption,
    IntegrityMismatch,
    CryptoFailure,
    SafetyAbort,
    Concurrency,
    Cancelled,
}

/// Every fallible engine operation returns this error type. Each variant
/// maps to exactly one [`ErrorKind`] via [`EngineError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure: {0}")]
    IoMessage(String),

    #[error("state corruption: {0}")]
    StateCorruption(String),

    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("safety abort: {0}")]
    SafetyAbort(String),

    #[error("destination locked: {0}")]
    Concurrency(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::Io { .. } | EngineError::IoMessage(_) => ErrorKind::IoFailure,
            EngineError::StateCorruption(_) => ErrorKind::StateCorruption,
            EngineError::IntegrityMismatch(_) => ErrorKind::IntegrityMismatch,
            EngineError::CryptoFailure(_) => ErrorKind::CryptoFailure,
            EngineError::SafetyAbort(_) => ErrorKind::SafetyAbort,
            EngineError::Concurrency(_) => ErrorKind::Concurrency,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io { path: path.into(), source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
