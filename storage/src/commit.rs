//! [C10] Commit path: what happens once cached content needs to reach
//! the persistent store, and the explicit state machine a cached block
//! entry moves through along the way (spec.md §4.10).

/// Lifecycle of one cached block entry. A block starts `CleanUnstaged`
/// the moment it's decrypted off the store and nothing has touched it
/// since; `DirtyStaged` once some inode/vnode bound to it has been
/// mutated; `CleanStaged` again once `commit_dirtyq` has re-encrypted
/// and written it back. Transitions happen only inside `Cache`,
/// `Dispatcher` and `commit_dirtyq` itself — never from an outside
/// caller, so the dirty queue and a block's `BlockState` never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    CleanUnstaged,
    CleanStaged,
    DirtyStaged,
}

impl BlockState {
    /// Whether a block in this state may be silently dropped from the
    /// cache without losing an edit that hasn't reached the store yet.
    pub fn is_evictable(&self) -> bool {
        !matches!(self, BlockState::DirtyStaged)
    }
}

/// `commit_dirtyq(flags)`'s final step: whether to force the persistent
/// store's backing file/device to durable storage once every dirty
/// block has been written out.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitFlags {
    pub sync: bool,
    /// `fsync` vs `fdatasync` (spec.md §4.2's `C2::sync(datasync)`).
    pub datasync: bool,
    /// Forces an immediate drain of the dirty queue regardless of its
    /// size, without also forcing a durable `sync` of the store (spec.md
    /// §4.10 step 1: "if the caller did not force sync/now..."). Set by
    /// the memory-pressure path (`Dispatcher::reserve_block_budget`)
    /// when clean blocks must be reclaimed right away.
    pub now: bool,
}

/// Step 1 of `commit_dirtyq`: before a dirty block is re-encrypted,
/// every dirty object's header embedded in it needs its checksum
/// refreshed so it reflects the edit that made the block dirty in the
/// first place. `dirty_ranges` is `(offset, len)` pairs local to
/// `block`.
pub fn reseal_dirty_ranges(block: &mut [u8], dirty_ranges: &[(usize, usize)]) {
    for &(off, len) in dirty_ranges {
        crate::framing::seal(&mut block[off..off + len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_staged_blocks_are_not_evictable() {
        assert!(!BlockState::DirtyStaged.is_evictable());
        assert!(BlockState::CleanStaged.is_evictable());
        assert!(BlockState::CleanUnstaged.is_evictable());
    }

    #[test]
    fn reseal_updates_checksum_in_place() {
        use crate::vtype::Vtype;
        let mut block = vec![0u8; Vtype::Inode.persistent_size()];
        crate::framing::stamp(&mut block, Vtype::Inode, Vtype::Inode.persistent_size() as u32);
        block[crate::vtype::HEADER_SIZE] = 0x7;
        let len = block.len();
        reseal_dirty_ranges(&mut block, &[(0, len)]);
        crate::framing::verify(&block, Vtype::Inode).unwrap();
    }
}
