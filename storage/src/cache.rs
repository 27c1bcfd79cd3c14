//! [C7] Cache (spec.md §4.7): three independently-sized `CacheQ`
//! instances — blocks keyed by `lba`, inodes keyed by `ino`, vnodes
//! keyed by their absolute byte offset — plus the global dirty queue
//! and per-block dirty set the commit path (C10) drains.

use std::collections::{HashMap, HashSet};

use crate::commit::BlockState;
use crate::error::Result;
use crate::geometry::{Lba, BK_SIZE};
use crate::qalloc::{QPtr, QuickAlloc};
use crate::types::dirnode::DirHtreeNode;
use crate::types::filenode::FileRadixNode;
use crate::types::inode::Inode;
use crate::types::itnode::ItableNode;
use crate::types::symlinknode::SymlinkTailNode;
use crate::types::xattrnode::XattrNode;

/// Metadata budget handed to the cache's `QuickAlloc` — not used for
/// block-sized allocations (those come out of the data budget below),
/// only kept non-zero because `QuickAlloc::new` mmaps both memfds.
const QALLOC_META_BUDGET: usize = 64 * 1024;

/// Generic keyed cache with a monotonic access-cycle counter standing
/// in for an LRU list (spec.md §4.7: "hash table + LRU list + cycle
/// counter"); the counter alone is enough to pick an eviction victim
/// without maintaining a doubly-linked list by hand.
pub struct CacheQ<K, V> {
    entries: HashMap<K, (V, u64)>,
    cycle: u64,
}

impl<K: Eq + std::hash::Hash + Copy, V> CacheQ<K, V> {
    pub fn new() -> Self {
        CacheQ { entries: HashMap::new(), cycle: 0 }
    }

    fn tick(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    pub fn get(&mut self, k: &K) -> Option<&V> {
        let c = self.tick();
        if let Some(e) = self.entries.get_mut(k) {
            e.1 = c;
        }
        self.entries.get(k).map(|(v, _)| v)
    }

    pub fn get_mut(&mut self, k: &K) -> Option<&mut V> {
        let c = self.tick();
        let entry = self.entries.get_mut(k)?;
        entry.1 = c;
        Some(&mut entry.0)
    }

    pub fn contains(&self, k: &K) -> bool {
        self.entries.contains_key(k)
    }

    pub fn insert(&mut self, k: K, v: V) {
        let c = self.tick();
        self.entries.insert(k, (v, c));
    }

    pub fn remove(&mut self, k: &K) -> Option<V> {
        self.entries.remove(k).map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts the least-recently-touched entry for which `evictable`
    /// holds, if any.
    pub fn evict_lru<F: Fn(&K, &V) -> bool>(&mut self, evictable: F) -> Option<(K, V)> {
        let victim = *self
            .entries
            .iter()
            .filter(|(k, (v, _))| evictable(k, v))
            .min_by_key(|(_, (_, cycle))| *cycle)
            .map(|(k, _)| k)?;
        self.entries.remove(&victim).map(|v| (victim, v.0))
    }
}

impl<K: Eq + std::hash::Hash + Copy, V> Default for CacheQ<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cached, decrypted block's bytes plus its commit-path state.
pub struct BlockEntry {
    pub bytes: Vec<u8>,
    pub state: BlockState,
}

/// A decoded vnode, cached so repeated `stage_vnode` calls on the same
/// vaddr don't re-decode the owning block every time (spec.md §4.8's
/// "binding" step still runs once to produce this; afterwards this is
/// what `stage_vnode` hands back).
#[derive(Clone)]
pub enum VnodeEntry {
    Dir(DirHtreeNode),
    FileRadix(FileRadixNode),
    Xattr(XattrNode),
    SymlinkTail(SymlinkTailNode),
    Itable(ItableNode),
}

/// Budgets the three `CacheQ`s are capped at before `relax()` starts
/// evicting (spec.md §4.7 "memory-pressure-triggered commit").
pub struct CacheBudgets {
    pub blocks: usize,
    pub inodes: usize,
    pub vnodes: usize,
}

impl Default for CacheBudgets {
    fn default() -> Self {
        CacheBudgets { blocks: 4096, inodes: 4096, vnodes: 4096 }
    }
}

pub struct Cache {
    budgets: CacheBudgets,
    blocks: CacheQ<Lba, BlockEntry>,
    inodes: CacheQ<u64, Inode>,
    vnodes: CacheQ<u64, VnodeEntry>,
    /// Global dirty queue: every `lba` with at least one unflushed edit.
    dirty_blocks: HashSet<Lba>,
    /// Per-block dirty set: `(local offset, object length)` pairs that
    /// need their header re-sealed before the block is re-encrypted.
    block_dirty_ranges: HashMap<Lba, Vec<(usize, usize)>>,
    /// [C1] Bounded, memfd-backed budget a resident block consumes one
    /// `BK_SIZE`-sized slot of (spec.md §4.1, §4.7): every cached block
    /// holds a `QPtr` here for the lifetime of its cache residency, so
    /// the dispatcher's `reserve_block_budget` can fail with a real
    /// `Error::OutOfMemory` instead of letting the cache grow unbounded.
    qalloc: QuickAlloc,
    block_qptrs: HashMap<Lba, QPtr>,
}

impl Cache {
    pub fn new(budgets: CacheBudgets) -> Result<Self> {
        let data_budget = budgets.blocks.max(1) * BK_SIZE as usize;
        Ok(Cache {
            budgets,
            blocks: CacheQ::new(),
            inodes: CacheQ::new(),
            vnodes: CacheQ::new(),
            dirty_blocks: HashSet::new(),
            block_dirty_ranges: HashMap::new(),
            qalloc: QuickAlloc::new(data_budget, QALLOC_META_BUDGET)?,
            block_qptrs: HashMap::new(),
        })
    }

    pub fn block(&mut self, lba: Lba) -> Option<&BlockEntry> {
        self.blocks.get(&lba)
    }

    pub fn block_mut(&mut self, lba: Lba) -> Option<&mut BlockEntry> {
        self.blocks.get_mut(&lba)
    }

    /// Reserves one `BK_SIZE`-sized slot from the quick allocator's
    /// bounded budget. Callers insert a block only once this succeeds;
    /// on `Err(Error::OutOfMemory)` they evict (or force a commit and
    /// evict) before retrying (spec.md §4.7's memory-pressure path).
    pub fn reserve_block_slot(&mut self) -> Result<QPtr> {
        self.qalloc.alloc(BK_SIZE as usize)
    }

    pub fn insert_block(&mut self, lba: Lba, bytes: Vec<u8>, state: BlockState, slot: QPtr) {
        self.block_qptrs.insert(lba, slot);
        self.blocks.insert(lba, BlockEntry { bytes, state });
    }

    pub fn inode(&mut self, ino: u64) -> Option<&Inode> {
        self.inodes.get(&ino)
    }

    pub fn inode_mut(&mut self, ino: u64) -> Option<&mut Inode> {
        self.inodes.get_mut(&ino)
    }

    pub fn insert_inode(&mut self, ino: u64, inode: Inode) {
        self.inodes.insert(ino, inode);
    }

    pub fn remove_inode(&mut self, ino: u64) -> Option<Inode> {
        self.inodes.remove(&ino)
    }

    pub fn vnode(&mut self, off: u64) -> Option<&VnodeEntry> {
        self.vnodes.get(&off)
    }

    pub fn vnode_mut(&mut self, off: u64) -> Option<&mut VnodeEntry> {
        self.vnodes.get_mut(&off)
    }

    pub fn insert_vnode(&mut self, off: u64, v: VnodeEntry) {
        self.vnodes.insert(off, v);
    }

    pub fn remove_vnode(&mut self, off: u64) -> Option<VnodeEntry> {
        self.vnodes.remove(&off)
    }

    /// Marks `lba` dirty with no record of which sub-range changed
    /// (used for whole-block objects: super-block, uspace-map,
    /// agroup-map, raw data cells).
    pub fn mark_block_dirty(&mut self, lba: Lba) {
        self.dirty_blocks.insert(lba);
    }

    /// Marks the vnode/inode living at `(lba, local_off, len)` dirty —
    /// both the owning block and the specific header range that needs
    /// resealing before commit.
    pub fn mark_range_dirty(&mut self, lba: Lba, local_off: usize, len: usize) {
        self.dirty_blocks.insert(lba);
        let ranges = self.block_dirty_ranges.entry(lba).or_default();
        if !ranges.contains(&(local_off, len)) {
            ranges.push((local_off, len));
        }
    }

    pub fn is_dirty(&self, lba: Lba) -> bool {
        self.dirty_blocks.contains(&lba)
    }

    /// Size of the dirty queue, used to gate an unforced `commit_dirtyq`
    /// (spec.md §4.10 step 1).
    pub fn dirty_len(&self) -> usize {
        self.dirty_blocks.len()
    }

    /// Drains the entire dirty queue, returning each block's lba and
    /// its recorded dirty ranges (commit-path input).
    pub fn take_dirty(&mut self) -> Vec<(Lba, Vec<(usize, usize)>)> {
        self.dirty_blocks
            .drain()
            .map(|lba| (lba, self.block_dirty_ranges.remove(&lba).unwrap_or_default()))
            .collect()
    }

    /// Three-pass eviction (spec.md §4.7): vnodes first, then inodes,
    /// then blocks — decoded views are cheapest to recompute, raw
    /// blocks the most expensive (they require a crypto-store round
    /// trip). A dirty, unflushed block is never evicted.
    pub fn relax(&mut self) -> bool {
        if self.vnodes.len() >= self.budgets.vnodes {
            if self.vnodes.evict_lru(|_, _| true).is_some() {
                return true;
            }
        }
        if self.inodes.len() >= self.budgets.inodes {
            if self.inodes.evict_lru(|_, _| true).is_some() {
                return true;
            }
        }
        if self.blocks.len() >= self.budgets.blocks {
            let dirty = &self.dirty_blocks;
            if let Some((victim, _)) = self
                .blocks
                .evict_lru(|lba, entry| entry.state.is_evictable() && !dirty.contains(lba))
            {
                if let Some(ptr) = self.block_qptrs.remove(&victim) {
                    let _ = self.qalloc.free(ptr, BK_SIZE as usize);
                }
                return true;
            }
        }
        false
    }

    /// Whether `relax()` would need a synchronous commit first because
    /// every block is either pinned-dirty or within budget (spec.md
    /// §4.7's "memory-pressure-triggered synchronous commit" — callers
    /// check this before allocating a fresh block to stage).
    pub fn needs_commit_before_relax(&self) -> bool {
        self.blocks.len() >= self.budgets.blocks
            && self
                .blocks
                .entries
                .iter()
                .filter(|(lba, _)| !self.dirty_blocks.contains(lba))
                .count()
                == 0
    }

    /// Drops every cached entry unconditionally (spec.md §4.7 `drop()`)
    /// — used at unmount after a final `commit_dirtyq` has emptied the
    /// dirty queue.
    pub fn drop_all(&mut self) {
        debug_assert!(self.dirty_blocks.is_empty(), "drop() called with a pending commit");
        for (_, ptr) in self.block_qptrs.drain() {
            let _ = self.qalloc.free(ptr, BK_SIZE as usize);
        }
        self.blocks = CacheQ::new();
        self.inodes = CacheQ::new();
        self.vnodes = CacheQ::new();
        self.block_dirty_ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cacheq_evicts_the_least_recently_touched_entry() {
        let mut q: CacheQ<u64, &'static str> = CacheQ::new();
        q.insert(1, "a");
        q.insert(2, "b");
        q.get(&1); // touches 1, so 2 becomes the LRU victim
        let (victim, _) = q.evict_lru(|_, _| true).unwrap();
        assert_eq!(victim, 2);
    }

    #[test]
    fn dirty_block_is_not_evicted_by_relax() {
        let mut cache = Cache::new(CacheBudgets { blocks: 0, inodes: 0, vnodes: 0 }).unwrap();
        let slot = cache.reserve_block_slot().unwrap();
        cache.insert_block(7, vec![0u8; 16], BlockState::DirtyStaged, slot);
        cache.mark_block_dirty(7);
        assert!(!cache.relax());
        assert!(cache.block(7).is_some());
    }

    #[test]
    fn clean_block_over_budget_is_evicted_by_relax() {
        let mut cache = Cache::new(CacheBudgets { blocks: 0, inodes: 0, vnodes: 0 }).unwrap();
        let slot = cache.reserve_block_slot().unwrap();
        cache.insert_block(7, vec![0u8; 16], BlockState::CleanStaged, slot);
        assert!(cache.relax());
        assert!(cache.block(7).is_none());
    }

    #[test]
    fn evicted_block_frees_its_qalloc_slot_for_reuse() {
        let mut cache = Cache::new(CacheBudgets { blocks: 1, inodes: 0, vnodes: 0 }).unwrap();
        let slot = cache.reserve_block_slot().unwrap();
        cache.insert_block(7, vec![0u8; 16], BlockState::CleanStaged, slot);
        assert!(cache.relax());
        // The budget was sized for exactly one block; if the evicted
        // block's slot wasn't freed, this would fail with OutOfMemory.
        assert!(cache.reserve_block_slot().is_ok());
    }

    #[test]
    fn take_dirty_returns_and_clears_ranges() {
        let mut cache = Cache::new(CacheBudgets::default()).unwrap();
        cache.mark_range_dirty(3, 16, 1024);
        cache.mark_range_dirty(3, 1040, 1024);
        let drained = cache.take_dirty();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, 3);
        assert_eq!(drained[0].1.len(), 2);
        assert!(cache.take_dirty().is_empty());
    }
}
