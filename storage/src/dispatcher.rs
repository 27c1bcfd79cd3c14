//! [C8] Dispatcher: the only component allowed to turn a vaddr into
//! live, staged content or to mint a fresh one (spec.md §4.8). Owns the
//! persistent store, crypto-store, cache, the currently active
//! uspace-map/agroup-map pair, and the inode table built on top of
//! them.
//!
//! Simplification: a `Dispatcher` keeps exactly one uspace-map and one
//! agroup-map "hot" at a time — the AG currently being allocated from —
//! rather than an LRU of maps across the whole volume. This matches the
//! single-threaded, cooperative-core contract (spec.md §5) and keeps
//! the key-lookup/allocation code in one place; rolling over to the
//! next AG once the current one fills up is future work (see
//! DESIGN.md, "dispatcher AG rollover").

use crate::cache::{Cache, VnodeEntry};
use crate::commit::{self, BlockState, CommitFlags};
use crate::crypto::{CryptoKey, Iv};
use crate::cryptostore::{key_lookup, CryptoStore};
use crate::error::{Error, Result};
use crate::geometry::{
    ag_index_of, agroup_map_offset, first_ag_of_usp, first_data_lba_in_ag, phys_lba_offset,
    uspace_map_offset, AgIndex, Lba, UspIndex, Vaddr, BK_SIZE, KB,
};
use crate::itable::Itable;
use crate::qalloc::QPtr;
use crate::space;
use crate::store::PersistentStore;
use crate::types::agroupmap::AgroupMap;
use crate::types::dirnode::DirHtreeNode;
use crate::types::filenode::FileRadixNode;
use crate::types::inode::{Inode, InodeKind};
use crate::types::itnode::ItableNode;
use crate::types::superblock::Superblock;
use crate::types::symlinknode::SymlinkTailNode;
use crate::types::uspacemap::UspaceMap;
use crate::types::xattrnode::XattrNode;
use crate::util::get_timestamp;
use crate::vtype::{Vtype, HEADER_SIZE};

/// Uniform decode/encode for the fixed-layout persistent types, so
/// `View` can bind a cached block's byte range to the right accessor
/// without the dispatcher hand-matching a vtype at every call site.
pub trait Persistent: Sized {
    const VTYPE: Vtype;
    fn decode(buf: &[u8]) -> Result<Self>;
    fn encode(&self) -> Vec<u8>;
}

macro_rules! impl_persistent {
    ($t:ty, $vt:expr) => {
        impl Persistent for $t {
            const VTYPE: Vtype = $vt;
            fn decode(buf: &[u8]) -> Result<Self> {
                Ok(Self::from_buffer(buf))
            }
            fn encode(&self) -> Vec<u8> {
                self.to_buffer()
            }
        }
    };
}

impl_persistent!(Inode, Vtype::Inode);
impl_persistent!(DirHtreeNode, Vtype::DirHtreeNode);
impl_persistent!(FileRadixNode, Vtype::FileRadixNode);
impl_persistent!(SymlinkTailNode, Vtype::SymlinkTail);
impl_persistent!(ItableNode, Vtype::ItableNode);

impl Persistent for XattrNode {
    const VTYPE: Vtype = Vtype::XattrNode;
    fn decode(buf: &[u8]) -> Result<Self> {
        XattrNode::from_buffer(buf)
    }
    fn encode(&self) -> Vec<u8> {
        self.to_buffer()
    }
}

/// Binds a byte range inside a cached block to a typed accessor
/// (spec.md §4.8's binding step). Doesn't know its own absolute
/// position — callers still mark the owning block/range dirty
/// themselves after `put`.
pub struct View<'a, T> {
    bytes: &'a mut [u8],
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: Persistent> View<'a, T> {
    pub fn bind(bytes: &'a mut [u8]) -> Self {
        View { bytes, _marker: std::marker::PhantomData }
    }

    pub fn get(&self) -> Result<T> {
        crate::framing::verify(self.bytes, T::VTYPE)?;
        T::decode(self.bytes)
    }

    pub fn put(&mut self, value: &T) {
        crate::framing::stamp(self.bytes, T::VTYPE, T::VTYPE.persistent_size() as u32);
        let encoded = value.encode();
        self.bytes[HEADER_SIZE..].copy_from_slice(&encoded[HEADER_SIZE..]);
        crate::framing::seal(self.bytes);
    }
}

pub struct Dispatcher {
    store: PersistentStore,
    cstore: CryptoStore,
    cache: Cache,
    superblock: Superblock,
    usp_index: UspIndex,
    uspace: UspaceMap,
    ag_slot: usize,
    agroup: AgroupMap,
    itable: Itable,
}

impl Dispatcher {
    pub fn new(
        store: PersistentStore,
        superblock: Superblock,
        usp_index: UspIndex,
        uspace: UspaceMap,
        ag_slot: usize,
        agroup: AgroupMap,
        itable: Itable,
    ) -> Result<Self> {
        Ok(Dispatcher {
            store,
            cstore: CryptoStore::new(),
            cache: Cache::new(crate::cache::CacheBudgets::default())?,
            superblock,
            usp_index,
            uspace,
            ag_slot,
            agroup,
            itable,
        })
    }

    fn ag_index(&self) -> AgIndex {
        first_ag_of_usp(self.usp_index) + self.ag_slot as u64
    }

    fn lba_of(&self, bkref_slot: usize) -> Lba {
        first_data_lba_in_ag(self.ag_index()) + bkref_slot as u64
    }

    fn bkref_slot_of(&self, lba: Lba) -> usize {
        (lba - first_data_lba_in_ag(ag_index_of(lba))) as usize
    }

    /// Ensures `lba`'s block is present and decrypted in the cache.
    /// A block that fails to authenticate and has never been staged
    /// this session is treated as a freshly-allocated, still-zeroed
    /// cell range rather than propagating a corruption error — formatted
    /// volumes pre-encrypt every block as zeros, so this only triggers
    /// for content mkfs never reached.
    fn ensure_block(&mut self, lba: Lba) -> Result<()> {
        if self.cache.block(lba).is_some() {
            return Ok(());
        }
        let slot = self.bkref_slot_of(lba);
        let (iv, key) = key_lookup::for_data_block(&self.agroup, slot);
        let bytes = match self.cstore.load_decrypt(
            &mut self.store,
            phys_lba_offset(lba),
            &iv,
            &key,
            BK_SIZE as usize,
        ) {
            Ok(b) => b,
            Err(Error::CryptoFailure(_)) | Err(Error::FilesystemCorrupted(_)) => {
                vec![0u8; BK_SIZE as usize]
            }
            Err(e) => return Err(e),
        };
        let slot = self.reserve_block_budget()?;
        self.cache.insert_block(lba, bytes, BlockState::CleanUnstaged, slot);
        Ok(())
    }

    /// Reserves room for one more cached block against the cache's
    /// bounded memory budget (spec.md §4.1/§4.7/§5: "when the memfd-
    /// backed heap fills, the dispatcher forces a synchronous commit to
    /// reclaim clean blocks"). Tries the budget directly first; on
    /// exhaustion, evicts whatever `relax()` can reach; if every block
    /// is pinned dirty, forces a commit to clean them and evicts again;
    /// only then gives up with `Error::OutOfMemory`.
    fn reserve_block_budget(&mut self) -> Result<QPtr> {
        if let Ok(ptr) = self.cache.reserve_block_slot() {
            return Ok(ptr);
        }
        while self.cache.relax() {}
        if let Ok(ptr) = self.cache.reserve_block_slot() {
            return Ok(ptr);
        }
        if self.cache.needs_commit_before_relax() {
            self.commit_dirtyq(CommitFlags { sync: false, datasync: false, now: true })?;
            while self.cache.relax() {}
        }
        self.cache.reserve_block_slot()
    }

    /// `new_vspace(vtype)` (spec.md §4.8): allocates a fresh vaddr
    /// through the space engine and stages its backing block.
    pub fn new_vspace(&mut self, vtype: Vtype) -> Result<Vaddr> {
        let outcome = space::allocate(vtype, &mut self.uspace, &mut self.agroup)?;
        let lba = self.lba_of(outcome.bkref_slot);
        self.ensure_block(lba)?;
        Ok(Vaddr::new(vtype, lba, outcome.kbn))
    }

    fn local_range(vaddr: &Vaddr) -> (usize, usize) {
        (vaddr.kbn as usize * KB as usize, vaddr.len as usize)
    }

    fn write_view<T: Persistent>(&mut self, vaddr: &Vaddr, value: &T) {
        let (off, len) = Self::local_range(vaddr);
        let block = self
            .cache
            .block_mut(vaddr.lba)
            .expect("block must be staged before writing a view into it");
        let mut view: View<T> = View::bind(&mut block.bytes[off..off + len]);
        view.put(value);
        block.state = BlockState::DirtyStaged;
        self.cache.mark_range_dirty(vaddr.lba, off, len);
    }

    fn read_view<T: Persistent>(&mut self, vaddr: &Vaddr) -> Result<T> {
        self.ensure_block(vaddr.lba)?;
        let (off, len) = Self::local_range(vaddr);
        let block = self.cache.block_mut(vaddr.lba).expect("just ensured");
        let view: View<T> = View::bind(&mut block.bytes[off..off + len]);
        view.get()
    }

    /// `new_inode` (spec.md §4.8): acquires a fresh ino from the inode
    /// table, allocates its vaddr, writes a freshly-initialized inode
    /// and binds the two together.
    pub fn new_inode(
        &mut self,
        parent_ino: u64,
        mode: u32,
        uid: u32,
        gid: u32,
        kind: InodeKind,
    ) -> Result<u64> {
        let ino = self.itable.acquire_ino();
        let vaddr = self.new_vspace(Vtype::Inode)?;
        let inode = Inode::new(ino, parent_ino, mode, uid, gid, kind, get_timestamp().as_secs());
        self.write_view(&vaddr, &inode);
        self.itable.bind_ino(ino, vaddr);
        self.cache.insert_inode(ino, inode);
        Ok(ino)
    }

    /// `new_vnode` (spec.md §4.8): allocates a vaddr for a directory/
    /// file-radix/xattr/symlink-tail/itable node and stages the
    /// caller-constructed instance of it.
    pub fn new_vnode(&mut self, entry: VnodeEntry) -> Result<Vaddr> {
        let vtype = match &entry {
            VnodeEntry::Dir(_) => Vtype::DirHtreeNode,
            VnodeEntry::FileRadix(_) => Vtype::FileRadixNode,
            VnodeEntry::Xattr(_) => Vtype::XattrNode,
            VnodeEntry::SymlinkTail(_) => Vtype::SymlinkTail,
            VnodeEntry::Itable(_) => Vtype::ItableNode,
        };
        let vaddr = self.new_vspace(vtype)?;
        match &entry {
            VnodeEntry::Dir(n) => self.write_view(&vaddr, n),
            VnodeEntry::FileRadix(n) => self.write_view(&vaddr, n),
            VnodeEntry::Xattr(n) => self.write_view(&vaddr, n),
            VnodeEntry::SymlinkTail(n) => self.write_view(&vaddr, n),
            VnodeEntry::Itable(n) => self.write_view(&vaddr, n),
        }
        self.cache.insert_vnode(vaddr.off(), entry);
        Ok(vaddr)
    }

    /// `stage_inode(ino)` (spec.md §4.8): resolves `ino` through the
    /// inode table and loads it into the cache if it isn't already.
    pub fn stage_inode(&mut self, ino: u64) -> Result<&Inode> {
        if self.cache.inode(ino).is_none() {
            let vaddr = self.itable.resolve_ino(ino).ok_or(Error::NotFound)?;
            let inode: Inode = self.read_view(&vaddr)?;
            self.cache.insert_inode(ino, inode);
        }
        Ok(self.cache.inode(ino).expect("just staged"))
    }

    pub fn stage_inode_mut(&mut self, ino: u64) -> Result<&mut Inode> {
        self.stage_inode(ino)?;
        Ok(self.cache.inode_mut(ino).expect("just staged"))
    }

    /// Re-encodes the cached inode `ino` back into its backing block
    /// and marks the range dirty. Callers mutate through
    /// `stage_inode_mut` and call this once they're done.
    pub fn flush_inode(&mut self, ino: u64) -> Result<()> {
        let vaddr = self.itable.resolve_ino(ino).ok_or(Error::NotFound)?;
        let inode = self.cache.inode(ino).ok_or(Error::NotFound)?.clone();
        self.write_view(&vaddr, &inode);
        Ok(())
    }

    /// `stage_vnode(vaddr)` (spec.md §4.8).
    pub fn stage_vnode(&mut self, vaddr: Vaddr) -> Result<&VnodeEntry> {
        let off = vaddr.off();
        if self.cache.vnode(off).is_none() {
            let entry = self.decode_vnode(&vaddr)?;
            self.cache.insert_vnode(off, entry);
        }
        Ok(self.cache.vnode(off).expect("just staged"))
    }

    pub fn stage_vnode_mut(&mut self, vaddr: Vaddr) -> Result<&mut VnodeEntry> {
        self.stage_vnode(vaddr)?;
        Ok(self.cache.vnode_mut(vaddr.off()).expect("just staged"))
    }

    fn decode_vnode(&mut self, vaddr: &Vaddr) -> Result<VnodeEntry> {
        Ok(match vaddr.vtype {
            Vtype::DirHtreeNode => VnodeEntry::Dir(self.read_view(vaddr)?),
            Vtype::FileRadixNode => VnodeEntry::FileRadix(self.read_view(vaddr)?),
            Vtype::XattrNode => VnodeEntry::Xattr(self.read_view(vaddr)?),
            Vtype::SymlinkTail => VnodeEntry::SymlinkTail(self.read_view(vaddr)?),
            Vtype::ItableNode => VnodeEntry::Itable(self.read_view(vaddr)?),
            other => return Err(Error::invalid(format!("{:?} is not a vnode type", other))),
        })
    }

    /// Re-encodes the cached vnode at `vaddr` back into its backing
    /// block and marks the range dirty.
    pub fn flush_vnode(&mut self, vaddr: Vaddr) -> Result<()> {
        let off = vaddr.off();
        match self.cache.vnode(off).ok_or(Error::NotFound)? {
            VnodeEntry::Dir(n) => {
                let n = n.clone();
                self.write_view(&vaddr, &n);
            }
            VnodeEntry::FileRadix(n) => {
                let n = n.clone();
                self.write_view(&vaddr, &n);
            }
            VnodeEntry::Xattr(n) => {
                let n = n.clone();
                self.write_view(&vaddr, &n);
            }
            VnodeEntry::SymlinkTail(n) => {
                let n = n.clone();
                self.write_view(&vaddr, &n);
            }
            VnodeEntry::Itable(n) => {
                let n = n.clone();
                self.write_view(&vaddr, &n);
            }
        }
        Ok(())
    }

    fn deallocate_vaddr(&mut self, vaddr: Vaddr) -> Result<()> {
        let slot = self.bkref_slot_of(vaddr.lba);
        let outcome = space::AllocOutcome {
            ag_slot: self.ag_slot,
            bkref_slot: slot,
            kbn: vaddr.kbn,
            nkb: vaddr.nkb(),
        };
        space::deallocate(outcome, vaddr.vtype, &mut self.uspace, &mut self.agroup)
    }

    /// `del_inode(ino)` (spec.md §4.8): releases the inode's vaddr and
    /// drops it from the inode table and cache.
    pub fn del_inode(&mut self, ino: u64) -> Result<()> {
        let vaddr = self.itable.resolve_ino(ino).ok_or(Error::NotFound)?;
        self.deallocate_vaddr(vaddr)?;
        self.itable.discard_ino(ino)?;
        self.cache.remove_inode(ino);
        Ok(())
    }

    /// `del_vnode(vaddr)` (spec.md §4.8).
    pub fn del_vnode(&mut self, vaddr: Vaddr) -> Result<()> {
        self.deallocate_vaddr(vaddr)?;
        self.cache.remove_vnode(vaddr.off());
        Ok(())
    }

    /// Dirty-queue size below which an unforced `commit_dirtyq` is a
    /// no-op (spec.md §4.10 step 1).
    const COMMIT_THRESHOLD: usize = 512;

    /// `commit_dirtyq(flags)` (spec.md §4.10): drains the dirty queue,
    /// re-seals every dirty object's header, re-encrypts each dirty
    /// block and writes it through the persistent store. Step 1: unless
    /// the caller forced it (`sync` or `now`), a dirty queue still under
    /// `COMMIT_THRESHOLD` is left alone rather than drained eagerly.
    pub fn commit_dirtyq(&mut self, flags: CommitFlags) -> Result<()> {
        if !flags.sync && !flags.now && self.cache.dirty_len() < Self::COMMIT_THRESHOLD {
            return Ok(());
        }
        for (lba, ranges) in self.cache.take_dirty() {
            let slot = self.bkref_slot_of(lba);
            let (iv, key) = key_lookup::for_data_block(&self.agroup, slot);
            let block = self
                .cache
                .block_mut(lba)
                .ok_or_else(|| Error::corrupted("dirty lba missing from cache"))?;
            commit::reseal_dirty_ranges(&mut block.bytes, &ranges);
            self.cstore
                .encrypt_save(&mut self.store, phys_lba_offset(lba), &iv, &key, &block.bytes)?;
            block.state = BlockState::CleanStaged;
        }
        if flags.sync {
            self.store.sync(flags.datasync)?;
        }
        Ok(())
    }

    /// Opportunistic background commit (spec.md §4.10 step 1): a no-op
    /// unless the dirty queue has grown past `COMMIT_THRESHOLD`. Callers
    /// on the write path call this after each mutation instead of
    /// forcing a commit themselves; `fsync`/unmount use `commit_dirtyq`
    /// directly with `sync`/`now` set to force one regardless of size.
    pub fn maybe_commit_dirtyq(&mut self) -> Result<()> {
        self.commit_dirtyq(CommitFlags { sync: false, datasync: false, now: false })
    }

    pub fn itable(&self) -> &Itable {
        &self.itable
    }

    pub fn itable_mut(&mut self) -> &mut Itable {
        &mut self.itable
    }

    pub fn usp_index(&self) -> UspIndex {
        self.usp_index
    }

    pub fn ag_slot(&self) -> usize {
        self.ag_slot
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    /// Creates the reserved root inode (`itable::ROOT_INO`), bypassing
    /// `itable.acquire_ino()` since that counter starts above the
    /// reserved value (spec.md §4.9 `bind_root_ino`). Used only by
    /// `format::format` — a mounted volume's root already exists.
    pub fn new_root_inode(
        &mut self,
        root_ino: u64,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<(u64, Vaddr)> {
        let vaddr = self.new_vspace(Vtype::Inode)?;
        let inode = Inode::new(root_ino, root_ino, mode, uid, gid, InodeKind::Directory, get_timestamp().as_secs());
        self.write_view(&vaddr, &inode);
        self.itable.bind_ino(root_ino, vaddr);
        self.cache.insert_inode(root_ino, inode);
        Ok((root_ino, vaddr))
    }

    /// Re-encrypts and writes this dispatcher's hot agroup-map and
    /// uspace-map back to their fixed, reserved offsets (spec.md §6).
    /// Unlike data/meta blocks, these never pass through the cache's
    /// dirty queue — their accounting fields change directly as a
    /// side effect of `allocate`/`deallocate`, so callers persist them
    /// explicitly after a batch of such changes (at format time, and at
    /// unmount/sync).
    pub fn persist_maps(&mut self) -> Result<()> {
        let (ag_iv, ag_key) = key_lookup::for_agroup_map(&self.uspace, self.ag_slot);
        self.cstore.encrypt_save(
            &mut self.store,
            agroup_map_offset(self.ag_index()),
            &ag_iv,
            &ag_key,
            &self.agroup.to_buffer(),
        )?;
        let (usp_iv, usp_key) = key_lookup::for_uspace_map(&self.superblock, self.usp_index);
        self.cstore.encrypt_save(
            &mut self.store,
            uspace_map_offset(self.usp_index),
            &usp_iv,
            &usp_key,
            &self.uspace.to_buffer(),
        )?;
        Ok(())
    }

    /// Re-encrypts and writes the super block with the master `(iv,
    /// key)` derived from the mount passphrase (spec.md §4.6: "super
    /// block -> derived once at mount from passphrase+salt").
    pub fn persist_superblock(&mut self, master_iv: &Iv, master_key: &CryptoKey) -> Result<()> {
        self.cstore
            .encrypt_save(&mut self.store, 0, master_iv, master_key, &self.superblock.to_buffer())
    }

    /// Writes a raw `Vtype::Data` cell (spec.md §4.4: data segments skip
    /// sealing, relying on the GCM tag alone). `bytes` is padded with
    /// zeros up to the segment's full length if shorter. A data segment
    /// now spans a whole block (spec.md §3 item 9), i.e. both boctets of
    /// its bkref, so the unwritten flag is checked and cleared across
    /// both rather than the single boctet a sub-block cell would occupy
    /// — resolving the Open Question in spec.md §9 ("the safe choice is
    /// to zero the entire block on first touch") the same way a partial
    /// boctet write would: zero before the write lands, not after.
    pub fn write_data(&mut self, vaddr: &Vaddr, bytes: &[u8]) {
        debug_assert_eq!(vaddr.vtype, Vtype::Data);
        let slot = self.bkref_slot_of(vaddr.lba);
        let was_unwritten = self.agroup.bkref(slot).boctets.iter().any(|bo| bo.is_unwritten());

        let (off, len) = Self::local_range(vaddr);
        let block = self
            .cache
            .block_mut(vaddr.lba)
            .expect("block must be staged before writing data into it");

        if was_unwritten {
            for b in &mut block.bytes[off..off + len] {
                *b = 0;
            }
        }
        let n = bytes.len().min(len);
        block.bytes[off..off + n].copy_from_slice(&bytes[..n]);
        for b in &mut block.bytes[off + n..off + len] {
            *b = 0;
        }
        block.state = BlockState::DirtyStaged;
        self.cache.mark_range_dirty(vaddr.lba, off, len);

        if was_unwritten {
            for bo in self.agroup.bkref_mut(slot).boctets.iter_mut() {
                bo.set_unwritten(false);
            }
        }
    }

    /// Reads a raw `Vtype::Data` cell back out. A segment whose boctets
    /// are still unwritten reads as zeros regardless of whatever
    /// ciphertext its enclosing block happens to hold on disk (spec.md
    /// §3, §4.5 "Unwritten semantics" — testable property #4).
    pub fn read_data(&mut self, vaddr: &Vaddr) -> Result<Vec<u8>> {
        debug_assert_eq!(vaddr.vtype, Vtype::Data);
        let (off, len) = Self::local_range(vaddr);
        let slot = self.bkref_slot_of(vaddr.lba);
        if self.agroup.bkref(slot).boctets.iter().any(|bo| bo.is_unwritten()) {
            return Ok(vec![0u8; len]);
        }
        self.ensure_block(vaddr.lba)?;
        let block = self.cache.block_mut(vaddr.lba).expect("just ensured");
        Ok(block.bytes[off..off + len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{VOLUME_SIZE_MIN, RESERVED_AGS};
    use crate::types::superblock::Superblock;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScratchPath(std::path::PathBuf);

    impl ScratchPath {
        fn new() -> Self {
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir()
                .join(format!("voluta-dispatcher-test-{}-{}.img", std::process::id(), n));
            ScratchPath(path)
        }
    }

    impl Drop for ScratchPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn fresh_dispatcher(scratch: &ScratchPath) -> Dispatcher {
        let store = PersistentStore::create(&scratch.0, VOLUME_SIZE_MIN).unwrap();
        let sb = Superblock::new_formatted([1u8; 16], crate::crypto::random_iv(), 0);
        let mut uspace = UspaceMap::new_formatted();
        for slot in 0..crate::geometry::NUP_AGS as usize {
            space::format_ag_record(&mut uspace, slot);
        }
        let agroup = AgroupMap::new_formatted();
        Dispatcher::new(store, sb, 1, uspace, 0, agroup, Itable::new()).unwrap()
    }

    #[test]
    fn new_inode_then_stage_inode_roundtrips() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        let ino = d.new_inode(1, 0o644, 1000, 1000, InodeKind::Regular).unwrap();
        let staged = d.stage_inode(ino).unwrap();
        assert_eq!(staged.ino, ino);
        assert_eq!(staged.kind, InodeKind::Regular);
        assert_eq!(RESERVED_AGS, 2); // sanity: constant still what geometry assumes
    }

    #[test]
    fn new_vnode_then_stage_vnode_roundtrips() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        let node = DirHtreeNode::new(1, 0, 0);
        let vaddr = d.new_vnode(VnodeEntry::Dir(node)).unwrap();
        match d.stage_vnode(vaddr).unwrap() {
            VnodeEntry::Dir(n) => assert_eq!(n.parent_ino, 1),
            _ => panic!("wrong vnode kind"),
        }
    }

    #[test]
    fn del_inode_frees_its_cell_for_reuse() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        let used_before = d.agroup.nkb_used;
        let ino = d.new_inode(1, 0o644, 0, 0, InodeKind::Regular).unwrap();
        assert!(d.agroup.nkb_used > used_before);
        d.del_inode(ino).unwrap();
        assert_eq!(d.agroup.nkb_used, used_before);
        assert!(d.itable.resolve_ino(ino).is_none());
    }

    #[test]
    fn commit_dirtyq_clears_the_dirty_queue() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        d.new_inode(1, 0o644, 0, 0, InodeKind::Regular).unwrap();
        assert!(d.cache.dirty_len() > 0);
        d.commit_dirtyq(CommitFlags { sync: false, datasync: false, now: true }).unwrap();
        assert_eq!(d.cache.dirty_len(), 0);
    }

    #[test]
    fn unforced_commit_below_threshold_leaves_queue_untouched() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        d.new_inode(1, 0o644, 0, 0, InodeKind::Regular).unwrap();
        let before = d.cache.dirty_len();
        assert!(before > 0);
        d.maybe_commit_dirtyq().unwrap();
        assert_eq!(d.cache.dirty_len(), before, "queue is far below the threshold");
    }

    #[test]
    fn fresh_data_cell_reads_as_zero_before_any_write() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        let vaddr = d.new_vspace(Vtype::Data).unwrap();
        let bytes = d.read_data(&vaddr).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn data_cell_loses_its_unwritten_bit_once_written() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        let vaddr = d.new_vspace(Vtype::Data).unwrap();
        d.write_data(&vaddr, &[0xABu8; BK_SIZE as usize]);
        let read_back = d.read_data(&vaddr).unwrap();
        assert_eq!(read_back, vec![0xABu8; BK_SIZE as usize]);
    }

    #[test]
    fn partial_write_leaves_rest_of_the_segment_zeroed() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        let vaddr = d.new_vspace(Vtype::Data).unwrap();
        d.write_data(&vaddr, &[0xCDu8; KB as usize]);
        let read_back = d.read_data(&vaddr).unwrap();
        assert_eq!(&read_back[..KB as usize], &[0xCDu8; KB as usize][..]);
        assert!(read_back[KB as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn block_budget_exhaustion_forces_a_commit_then_succeeds() {
        let scratch = ScratchPath::new();
        let mut d = fresh_dispatcher(&scratch);
        d.cache = Cache::new(crate::cache::CacheBudgets { blocks: 1, inodes: 4096, vnodes: 4096 }).unwrap();

        let first = d.new_vspace(Vtype::Data).unwrap();
        d.write_data(&first, &[0xEEu8; KB as usize]);

        // The cache's one budgeted block is dirty, so staging a second,
        // distinct block must force a commit before it can evict the
        // first and make room — rather than fail with `OutOfMemory`.
        let second = d.new_vspace(Vtype::Data).unwrap();
        assert_ne!(first.lba, second.lba);
        d.write_data(&second, &[0xFFu8; KB as usize]);

        assert_eq!(&d.read_data(&first).unwrap()[..KB as usize], &[0xEEu8; KB as usize][..]);
        assert_eq!(&d.read_data(&second).unwrap()[..KB as usize], &[0xFFu8; KB as usize][..]);
    }
}
