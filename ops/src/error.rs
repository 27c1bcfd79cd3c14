//! POSIX-facing error kinds (spec.md §12): a thin errno-shaped wrapper
//! around `storage::Error` plus the namei-level conditions
//! `original_source/attic/voluta/lib/namei.c` checks for by hand
//! (`require_dir`, `require_notdir`, `check_sticky`, `require_nomlink`).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,

    #[error("file exists")]
    AlreadyExists,

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("name too long")]
    NameTooLong,

    #[error("too many links")]
    TooManyLinks,

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

impl Error {
    /// errno value a FUSE reply carries back to the kernel (spec.md §13).
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::NotDirectory => libc::ENOTDIR,
            Error::IsDirectory => libc::EISDIR,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::PermissionDenied => libc::EACCES,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::TooManyLinks => libc::EMLINK,
            Error::Storage(storage::Error::NoSpace) => libc::ENOSPC,
            Error::Storage(storage::Error::OutOfMemory) => libc::ENOMEM,
            Error::Storage(storage::Error::InvalidArgument(_)) => libc::EINVAL,
            Error::Storage(storage::Error::NotFound) => libc::ENOENT,
            Error::Storage(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
