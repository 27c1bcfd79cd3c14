//! Mount-time reload (spec.md §4.5 "At mount the engine reloads
//! super->uspace->agroup chains in order, re-deriving accounting from
//! persisted fields"; spec.md §4.9 `reload`).
//!
//! Mirrors the `Dispatcher`'s simplification (spec.md §4.8's comment on
//! keeping exactly one uspace-map/agroup-map hot): a mount always loads
//! uspace 1 / AG slot 0, the pair `format::format` always builds the
//! root objects in, matching dispatcher.rs's own simplifying
//! assumption.

use std::path::Path;

use crate::cryptostore::{key_lookup, CryptoStore};
use crate::dispatcher::Persistent;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::geometry::{agroup_map_offset, first_data_lba_in_ag, phys_lba_offset, uspace_map_offset, Vaddr};
use crate::itable::Itable;
use crate::store::PersistentStore;
use crate::types::agroupmap::AgroupMap;
use crate::types::itnode::ItableNode;
use crate::types::superblock::Superblock;
use crate::types::uspacemap::UspaceMap;
use crate::vtype::Vtype;

/// Opens an already-formatted volume at `path`, reloading the
/// super-block -> uspace-map -> agroup-map -> inode-table chain, and
/// returns a ready-to-use `Dispatcher`.
pub fn mount(path: &Path, passphrase: &[u8], salt: &[u8]) -> Result<Dispatcher> {
    let mut store = PersistentStore::open(path)?;
    let mut cstore = CryptoStore::new();

    let (master_iv, master_key) = key_lookup::for_super_block(passphrase, salt)?;
    let sb_bytes = cstore.load_decrypt(&mut store, 0, &master_iv, &master_key, Superblock::PERSISTENT_SIZE)?;
    crate::framing::verify(&sb_bytes, Vtype::Super)?;
    let sb = Superblock::from_buffer(&sb_bytes);

    let usp_index = 1;
    let (usp_iv, usp_key) = key_lookup::for_uspace_map(&sb, usp_index);
    let usp_bytes = cstore.load_decrypt(
        &mut store,
        uspace_map_offset(usp_index),
        &usp_iv,
        &usp_key,
        UspaceMap::PERSISTENT_SIZE,
    )?;
    crate::framing::verify(&usp_bytes, Vtype::UspaceMap)?;
    let usp = UspaceMap::from_buffer(&usp_bytes);

    let ag_slot = 0;
    let (ag_iv, ag_key) = key_lookup::for_agroup_map(&usp, ag_slot);
    let ag_index = crate::geometry::first_ag_of_usp(usp_index) + ag_slot as u64;
    let am_bytes = cstore.load_decrypt(
        &mut store,
        agroup_map_offset(ag_index),
        &ag_iv,
        &ag_key,
        AgroupMap::PERSISTENT_SIZE,
    )?;
    crate::framing::verify(&am_bytes, Vtype::AgroupMap)?;
    let am = AgroupMap::from_buffer(&am_bytes);

    let itable = match sb.root_itable_vaddr {
        Some(vaddr) => {
            let node: ItableNode = load_vnode(&mut store, &mut cstore, &am, &vaddr)?;
            Itable::reload(vec![node])
        }
        None => return Err(Error::corrupted("super block has no inode-table root")),
    };

    Dispatcher::new(store, sb, usp_index, usp, ag_slot, am, itable)
}

/// Standalone decrypt-then-verify-then-decode of a single view, used
/// only during the mount bootstrap before a `Dispatcher`'s cache
/// exists to do this through `stage_vnode`.
fn load_vnode<T: Persistent>(
    store: &mut PersistentStore,
    cstore: &mut CryptoStore,
    am: &AgroupMap,
    vaddr: &Vaddr,
) -> Result<T> {
    let slot = (vaddr.lba - first_data_lba_in_ag(vaddr.ag_index)) as usize;
    let (iv, key) = key_lookup::for_data_block(am, slot);
    let block = cstore.load_decrypt(store, phys_lba_offset(vaddr.lba), &iv, &key, crate::geometry::BK_SIZE as usize)?;
    let off = vaddr.kbn as usize * crate::geometry::KB as usize;
    let view = &block[off..off + vaddr.len as usize];
    crate::framing::verify(view, T::VTYPE)?;
    T::decode(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VOLUME_SIZE_MIN;
    use crate::itable::ROOT_INO;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScratchPath(std::path::PathBuf);

    impl ScratchPath {
        fn new() -> Self {
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir()
                .join(format!("voluta-mount-test-{}-{}.img", std::process::id(), n));
            ScratchPath(path)
        }
    }

    impl Drop for ScratchPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn mount_rejects_wrong_passphrase() {
        let scratch = ScratchPath::new();
        crate::format::format(&scratch.0, VOLUME_SIZE_MIN, b"right", b"s").unwrap();
        let err = mount(&scratch.0, b"wrong", b"s").unwrap_err();
        assert!(matches!(err, Error::FilesystemCorrupted(_)));
    }

    #[test]
    fn mount_after_format_resolves_root_ino() {
        let scratch = ScratchPath::new();
        crate::format::format(&scratch.0, VOLUME_SIZE_MIN, b"pw", b"s").unwrap();
        let mut d = mount(&scratch.0, b"pw", b"s").unwrap();
        assert!(d.itable().resolve_ino(ROOT_INO).is_some());
        let root = d.stage_inode(ROOT_INO).unwrap();
        assert_eq!(root.ino, ROOT_INO);
    }
}
