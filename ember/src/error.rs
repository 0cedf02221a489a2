//! Error types for Ember

use thiserror::Error;

/// Result type alias using Ember's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Ember operations
#[derive(Error, Debug)]
pub enum Error {
    /// The caller supplied a malformed argument (empty buffers,
    /// non-divisible batch sizes, out-of-range sampling parameters,
    /// empty stop sequences). Never worth retrying.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stop sequence identical to one already registered.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An executor or sampler violated its contract (e.g. wrong output
    /// cardinality from a decode step).
    #[error("internal error: {0}")]
    Internal(String),

    /// The selected backend does not implement this operation.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
