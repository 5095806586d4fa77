use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad format, truncated file).
    #[error("corruption: {0}")]
    Corruption(String),

    /// The database directory is locked by another process.
    #[error("directory locked: {0}")]
    DirectoryLocked(PathBuf),

    /// Caller passed something the engine cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A background flush or compaction failed; the engine is read-only
    /// until reopened.
    #[error("background error: {0}")]
    Background(String),

    /// Operation attempted on a closed database.
    #[error("database is closed")]
    Closed,
}

impl Error {
    /// Corruption errors share a lot of call sites; this keeps them terse.
    pub(crate) fn corruption(msg: impl Into<String>) -> Error {
        Error::Corruption(msg.into())
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
