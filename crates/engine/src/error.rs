use std::io;

use sstable::RunError;
use thiserror::Error;
use wal::WalError;

/// Errors surfaced by engine operations.
///
/// A missing key is not an error; `get` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A filesystem operation failed. Foreground errors propagate; the
    /// caller's mutation was not acknowledged.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Decoded data failed its invariants. During WAL recovery this
    /// truncates the tail instead; in run reads it fails the operation and
    /// the run stays in the catalog for operator attention.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Operation on a closed engine.
    #[error("engine is closed")]
    Closed,

    #[error("key must not be empty")]
    EmptyKey,

    #[error("key too large: {0} bytes (max {max})", max = crate::MAX_KEY_SIZE)]
    KeyTooLarge(usize),

    #[error("value too large: {0} bytes (max {max})", max = crate::MAX_VALUE_SIZE)]
    ValueTooLarge(usize),
}

impl From<RunError> for EngineError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Io(io) => EngineError::Io(io),
            RunError::Corrupt(msg) => EngineError::Corrupt(msg),
        }
    }
}

impl From<WalError> for EngineError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => EngineError::Io(io),
            WalError::Corrupt => EngineError::Corrupt("corrupt log record".into()),
            WalError::Closed => EngineError::Closed,
        }
    }
}
