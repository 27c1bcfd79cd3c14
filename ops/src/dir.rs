//! Directory operations (spec.md §12, grounded on
//! `original_source/attic/voluta/lib/dir.c`): dentry insert/remove and
//! readdir over a directory's h-tree node.
//!
//! Simplification: directories hold a single `DirHtreeNode`
//! (`MAX_DENTRIES = 24` entries) rather than a multi-level h-tree with
//! overflow nodes — `mkdir`/`link` return `ENOSPC`-shaped errors once a
//! directory's single node fills, instead of growing a second level.
//! Recorded in DESIGN.md as "directory h-tree has no overflow level".

use storage::cache::VnodeEntry;
use storage::dispatcher::Dispatcher;
use storage::types::dirnode::DirHtreeNode;
use storage::types::inode::InodeKind;

use crate::error::{Error, Result};
use crate::namei::{self, dtype_of};

pub struct Dirent {
    pub ino: u64,
    pub name: Vec<u8>,
    pub dtype: u8,
}

/// Binds `name -> ino` under `dir_ino`'s h-tree node.
pub fn link_dentry(d: &mut Dispatcher, dir_ino: u64, name: &[u8], ino: u64, kind: InodeKind) -> Result<()> {
    namei::require_valid_name(name)?;
    if namei::lookup_by_name(d, dir_ino, name)?.is_some() {
        return Err(Error::AlreadyExists);
    }
    let (vaddr, mut node) = namei::dir_node(d, dir_ino)?;
    if node.insert(ino, dtype_of(kind), name).is_none() {
        return Err(Error::Storage(storage::Error::NoSpace));
    }
    *d.stage_vnode_mut(vaddr)? = VnodeEntry::Dir(node);
    d.flush_vnode(vaddr)?;

    let dir = d.stage_inode_mut(dir_ino)?;
    dir.dir_ndents += 1;
    dir.mtime = storage::util::get_timestamp().as_secs();
    d.flush_inode(dir_ino)?;
    Ok(())
}

/// Removes `name` from `dir_ino`'s h-tree node, returning the child ino
/// that was bound to it.
pub fn unlink_dentry(d: &mut Dispatcher, dir_ino: u64, name: &[u8]) -> Result<u64> {
    namei::require_valid_name(name)?;
    let (vaddr, mut node) = namei::dir_node(d, dir_ino)?;
    let slot = node
        .dents
        .iter()
        .position(|dent| !dent.is_free() && dent.name() == name)
        .ok_or(Error::NotFound)?;
    let ino = node.dents[slot].ino;
    node.remove(slot);
    *d.stage_vnode_mut(vaddr)? = VnodeEntry::Dir(node);
    d.flush_vnode(vaddr)?;

    let dir = d.stage_inode_mut(dir_ino)?;
    dir.dir_ndents = dir.dir_ndents.saturating_sub(1);
    dir.mtime = storage::util::get_timestamp().as_secs();
    d.flush_inode(dir_ino)?;
    Ok(ino)
}

pub fn is_empty(d: &mut Dispatcher, dir_ino: u64) -> Result<bool> {
    let (_, node) = namei::dir_node(d, dir_ino)?;
    Ok(node.nents() == 0)
}

pub fn readdir(d: &mut Dispatcher, dir_ino: u64) -> Result<Vec<Dirent>> {
    let (_, node) = namei::dir_node(d, dir_ino)?;
    Ok(node
        .dents
        .iter()
        .filter(|dent| !dent.is_free())
        .map(|dent| Dirent { ino: dent.ino, name: dent.name().to_vec(), dtype: dent.dtype })
        .collect())
}

/// Creates the empty h-tree node a freshly-minted directory inode needs
/// (spec.md §4.9's `new_dir_inode`-equivalent bookkeeping).
pub fn init_empty_dir(d: &mut Dispatcher, ino: u64, parent_ino: u64) -> Result<()> {
    let vaddr = d.new_vnode(VnodeEntry::Dir(DirHtreeNode::new(parent_ino, 0, 0)))?;
    let inode = d.stage_inode_mut(ino)?;
    inode.dir_htree_root = Some(vaddr);
    inode.size = storage::geometry::KB;
    inode.blocks = 1;
    d.flush_inode(ino)?;
    Ok(())
}
