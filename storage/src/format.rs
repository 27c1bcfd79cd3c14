//! Formatting (spec.md §4.5 "Formatting", §6): writes the super block,
//! every uspace-map/agroup-map this volume's size can hold, and the
//! root inode. Grounded on the teacher's `FSFactory::create` pattern
//! (`mkfs/src/ext2.rs`'s `Ext2Factory::create`, which zero-fills the
//! block-group descriptor table and writes the root inode by hand)
//! generalized from ext2 block-group formatting to the three-level
//! uspace-map/agroup-map hierarchy.

use std::path::Path;

use crate::cryptostore::{key_lookup, CryptoStore};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::geometry::{
    agroup_map_offset, first_ag_of_usp, uspace_map_offset, RESERVED_AGS, NUP_AGS, PHYS_AG_SIZE,
};
use crate::itable::{Itable, ROOT_INO};
use crate::space;
use crate::store::PersistentStore;
use crate::types::agroupmap::AgroupMap;
use crate::types::dirnode::DirHtreeNode;
use crate::types::itnode::ItableNode;
use crate::types::superblock::Superblock;
use crate::types::uspacemap::UspaceMap;
use crate::vtype::Vtype;
use crate::{cache::VnodeEntry, crypto};

/// Default directory mode stamped onto the root inode at format time.
const ROOT_DIR_MODE: u32 = 0o755;

/// How many whole uspaces fit in `size` physical bytes, once the two
/// reserved AGs (super-block region, uspace-map table) are subtracted.
pub fn usable_uspaces(size: u64) -> u64 {
    let total_ags = size / PHYS_AG_SIZE;
    let real_ags = total_ags.saturating_sub(RESERVED_AGS);
    real_ags / NUP_AGS
}

pub struct FormatOutcome {
    pub uuid: [u8; 16],
    pub root_ino: u64,
    pub uspaces_formatted: u64,
}

/// Formats a fresh volume at `path`: creates the backing file at `size`
/// bytes, writes the super block, every uspace-map/agroup-map pair the
/// size admits, and the root directory inode (spec.md §4.5
/// "Formatting": "the engine writes the super block, all uspace-maps...,
/// all agroup-maps..., and the root inode").
pub fn format(path: &Path, size: u64, passphrase: &[u8], salt: &[u8]) -> Result<FormatOutcome> {
    let mut store = PersistentStore::create(path, size)?;
    let mut cstore = CryptoStore::new();

    let (master_iv, master_key) = key_lookup::for_super_block(passphrase, salt)?;
    let uuid = *uuid::Uuid::new_v4().as_bytes();
    let now = crate::util::get_timestamp().as_secs();
    let mut sb = Superblock::new_formatted(uuid, master_iv, now);

    let n_usp = usable_uspaces(size);
    if n_usp == 0 {
        return Err(Error::invalid("volume too small to hold a single uspace"));
    }

    // Uspace 1 / AG slot 0 hosts the root inode, its directory h-tree
    // node and the inode table's root node, so their maps are kept in
    // memory and formatted through a `Dispatcher` below instead of
    // being stamped-and-forgotten like every other AG in the volume.
    let mut usp1 = UspaceMap::new_formatted();
    let mut am0 = AgroupMap::new_formatted();

    for usp_index in 1..=n_usp {
        let mut usp = if usp_index == 1 { std::mem::replace(&mut usp1, UspaceMap::new_formatted()) } else { UspaceMap::new_formatted() };
        for ag_slot in 0..NUP_AGS as usize {
            space::format_ag_record(&mut usp, ag_slot);
            let ag_iv = crypto::random_iv();
            let ag_key = crypto::random_key();
            usp.set_ag_key(ag_slot, ag_iv.clone(), ag_key.clone());

            if usp_index == 1 && ag_slot == 0 {
                // Deferred: formatted and written once the root objects
                // have been allocated into it, below.
                continue;
            }
            let am = AgroupMap::new_formatted();
            let ag_index = first_ag_of_usp(usp_index) + ag_slot as u64;
            cstore.encrypt_save(&mut store, agroup_map_offset(ag_index), &ag_iv, &ag_key, &am.to_buffer())?;
        }
        let usp_iv = crypto::random_iv();
        let usp_key = crypto::random_key();
        sb.set_uspace_key(usp_index, usp_iv.clone(), usp_key.clone());
        if usp_index == 1 {
            usp1 = usp;
            continue; // written after the root objects are in place
        }
        cstore.encrypt_save(&mut store, uspace_map_offset(usp_index), &usp_iv, &usp_key, &usp.to_buffer())?;
    }

    let mut dispatcher = Dispatcher::new(store, sb, 1, usp1, 0, am0, Itable::new())?;

    let (root_ino, inode_vaddr) = dispatcher.new_root_inode(ROOT_INO, 0, 0, ROOT_DIR_MODE)?;
    let dir_vaddr = dispatcher.new_vnode(VnodeEntry::Dir(DirHtreeNode::new(root_ino, 0, 0)))?;
    {
        let inode = dispatcher.stage_inode_mut(root_ino)?;
        inode.dir_htree_root = Some(dir_vaddr);
        inode.size = crate::geometry::KB; // empty-dir constant: one h-tree node's worth
        inode.blocks = 1;
    }
    dispatcher.flush_inode(root_ino)?;

    let mut root_itnode = ItableNode::new(0, 0);
    root_itnode.bind(root_ino, inode_vaddr);
    let itable_root_vaddr = dispatcher.new_vnode(VnodeEntry::Itable(root_itnode))?;
    dispatcher.superblock_mut().root_itable_vaddr = Some(itable_root_vaddr);

    dispatcher.commit_dirtyq(crate::commit::CommitFlags { sync: true, datasync: false, now: false })?;
    dispatcher.persist_maps()?;
    dispatcher.persist_superblock(&master_iv, &master_key)?;

    Ok(FormatOutcome { uuid, root_ino, uspaces_formatted: n_usp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VOLUME_SIZE_MIN;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScratchPath(std::path::PathBuf);

    impl ScratchPath {
        fn new() -> Self {
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir()
                .join(format!("voluta-format-test-{}-{}.img", std::process::id(), n));
            ScratchPath(path)
        }
    }

    impl Drop for ScratchPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn format_then_mount_exposes_the_root_directory() {
        let scratch = ScratchPath::new();
        let outcome = format(&scratch.0, VOLUME_SIZE_MIN, b"pw", b"s").unwrap();
        assert_eq!(outcome.root_ino, ROOT_INO);
        assert!(outcome.uspaces_formatted >= 1);

        let mut d = crate::mount::mount(&scratch.0, b"pw", b"s").unwrap();
        let root = d.stage_inode(ROOT_INO).unwrap();
        assert_eq!(root.kind, crate::types::inode::InodeKind::Directory);
        assert_eq!(root.nlink, 2);
        assert_eq!(root.size, crate::geometry::KB);
    }

    #[test]
    fn format_rejects_undersized_volumes() {
        let scratch = ScratchPath::new();
        assert!(matches!(format(&scratch.0, PHYS_AG_SIZE, b"pw", b"s"), Err(Error::InvalidArgument(_))));
    }
}
