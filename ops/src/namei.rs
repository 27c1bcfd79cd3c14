//! Name resolution (spec.md §12, grounded on
//! `original_source/attic/voluta/lib/namei.c`'s `require_valid_name`/
//! `lookup_by_dname`): validates dentry names and resolves a single
//! path component against a directory's h-tree node.

use storage::dispatcher::Dispatcher;
use storage::geometry::Vaddr;
use storage::types::dirnode::{DirHtreeNode, NAME_INLINE_LEN};
use storage::types::inode::InodeKind;
use storage::cache::VnodeEntry;

use crate::error::{Error, Result};

pub const DT_UNKNOWN: u8 = 0;
pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;

pub fn dtype_of(kind: InodeKind) -> u8 {
    match kind {
        InodeKind::Directory => DT_DIR,
        InodeKind::Regular => DT_REG,
        InodeKind::Symlink => DT_LNK,
        InodeKind::Other => DT_UNKNOWN,
    }
}

/// Rejects empty names, `.`/`..`, embedded NUL and names too long for
/// a dentry slot (spec.md §3.5's `NAME_INLINE_LEN` cap — this engine has
/// no name-overflow node, so the cap is a hard limit, not just inline).
pub fn require_valid_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name == b"." || name == b".." {
        return Err(Error::InvalidArgument("invalid dentry name".into()));
    }
    if name.contains(&0) {
        return Err(Error::InvalidArgument("embedded NUL in name".into()));
    }
    if name.len() > NAME_INLINE_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

fn dir_root_vaddr(d: &mut Dispatcher, dir_ino: u64) -> Result<Vaddr> {
    let inode = d.stage_inode(dir_ino)?;
    if inode.kind != InodeKind::Directory {
        return Err(Error::NotDirectory);
    }
    inode.dir_htree_root.ok_or_else(|| Error::Storage(storage::Error::corrupted("directory missing htree root")))
}

/// Looks up `name` under `dir_ino`, returning the child's ino if found.
pub fn lookup_by_name(d: &mut Dispatcher, dir_ino: u64, name: &[u8]) -> Result<Option<u64>> {
    require_valid_name(name)?;
    let vaddr = dir_root_vaddr(d, dir_ino)?;
    let entry = d.stage_vnode(vaddr)?;
    let node = match entry {
        VnodeEntry::Dir(n) => n,
        _ => return Err(Error::Storage(storage::Error::corrupted("htree root is not a dir node"))),
    };
    Ok(node.dents.iter().find(|dent| !dent.is_free() && dent.name() == name).map(|dent| dent.ino))
}

pub(crate) fn dir_node(d: &mut Dispatcher, dir_ino: u64) -> Result<(Vaddr, DirHtreeNode)> {
    let vaddr = dir_root_vaddr(d, dir_ino)?;
    match d.stage_vnode(vaddr)?.clone() {
        VnodeEntry::Dir(n) => Ok((vaddr, n)),
        _ => Err(Error::Storage(storage::Error::corrupted("htree root is not a dir node"))),
    }
}
