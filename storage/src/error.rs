//! Error kinds surfaced by the storage engine (spec.md §7).

use std::io;

/// A leaf error kind returned by any component of the core.
///
/// Propagation policy: leaf components return one of these; the
/// dispatcher propagates without masking. `FilesystemCorrupted` is never
/// recovered in-flight — it always surfaces to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no space left on volume")]
    NoSpace,

    #[error("out of memory")]
    OutOfMemory,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("filesystem corrupted: {0}")]
    FilesystemCorrupted(String),

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Error::FilesystemCorrupted(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
