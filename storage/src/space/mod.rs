//! [C5] Space engine (spec.md §4.5): the two-level bitmap allocator over
//! uspace-maps and agroup-maps.

pub mod allocator;

pub use allocator::{allocate, deallocate, AllocOutcome};
