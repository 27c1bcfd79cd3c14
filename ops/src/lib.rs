//! The POSIX operation layer between `storage`'s block-level engine and
//! `fsd`'s FUSE bridge (spec.md §12).

pub mod dir;
pub mod error;
pub mod file;
pub mod inode;
pub mod namei;
pub mod opers;
pub mod symlink;
pub mod xattr;

pub use error::{Error, Result};
pub use opers::Operations;
