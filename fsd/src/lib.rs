//! The FUSE bridge (spec.md §13): a `fuser::Filesystem` adapter over
//! `ops::Operations`, plus the mount-control protocol server.

pub mod control;
pub mod filesystem;

pub use filesystem::VolutaFs;
