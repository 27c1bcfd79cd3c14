//! The POSIX operation umbrella (spec.md §12), grounded on
//! `original_source/attic/voluta/lib/opers.c`'s `voluta_fs_*` functions:
//! each method here is a thin, one-call-deep translation from POSIX
//! arguments into `Dispatcher`/`namei`/`dir`/`file`/`symlink`/`xattr`
//! calls. `fsd` is the only caller; it owns the FUSE request/reply
//! plumbing, this owns none of it.

use storage::dispatcher::Dispatcher;
use storage::types::inode::InodeKind;

use crate::dir::{self, Dirent};
use crate::error::{Error, Result};
use crate::file;
use crate::inode::{self, Attr, AttrChanges};
use crate::namei;
use crate::symlink;
use crate::xattr;

pub struct StatFs {
    pub total_uspaces: u64,
    pub block_size: u64,
}

/// Owns the mounted volume's `Dispatcher` and serves every POSIX
/// operation `fsd` needs against it. Single-threaded by construction
/// (spec.md §5) — callers serialize access the same way the dispatcher
/// itself assumes.
pub struct Operations {
    d: Dispatcher,
}

impl Operations {
    pub fn new(d: Dispatcher) -> Self {
        Operations { d }
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.d
    }

    pub fn lookup(&mut self, parent_ino: u64, name: &[u8]) -> Result<u64> {
        namei::lookup_by_name(&mut self.d, parent_ino, name)?.ok_or(Error::NotFound)
    }

    pub fn getattr(&mut self, ino: u64) -> Result<Attr> {
        inode::getattr(&mut self.d, ino)
    }

    pub fn setattr(&mut self, ino: u64, changes: AttrChanges) -> Result<Attr> {
        inode::setattr(&mut self.d, ino, changes)
    }

    /// Owner gets owner bits, everyone else gets world bits — this
    /// engine carries no group table (spec.md's Non-goals exclude
    /// multi-user ACLs), so group membership can't be checked here.
    pub fn access(&mut self, ino: u64, uid: u32, mode: u32) -> Result<()> {
        let attr = inode::getattr(&mut self.d, ino)?;
        if uid == 0 {
            return Ok(());
        }
        let allowed = if attr.uid == uid { (attr.mode >> 6) & 0o007 } else { attr.mode & 0o007 };
        if mode & !allowed & 0o007 != 0 {
            return Err(Error::PermissionDenied);
        }
        Ok(())
    }

    fn make_node(&mut self, parent_ino: u64, name: &[u8], mode: u32, uid: u32, gid: u32, kind: InodeKind) -> Result<u64> {
        namei::require_valid_name(name)?;
        if self.lookup(parent_ino, name).is_ok() {
            return Err(Error::AlreadyExists);
        }
        let ino = self.d.new_inode(parent_ino, mode, uid, gid, kind)?;
        if let Err(e) = dir::link_dentry(&mut self.d, parent_ino, name, ino, kind) {
            let _ = self.d.del_inode(ino);
            return Err(e);
        }
        Ok(ino)
    }

    pub fn mkdir(&mut self, parent_ino: u64, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<u64> {
        let ino = self.make_node(parent_ino, name, mode, uid, gid, InodeKind::Directory)?;
        dir::init_empty_dir(&mut self.d, ino, parent_ino)?;
        let parent = self.d.stage_inode_mut(parent_ino)?;
        parent.nlink += 1;
        self.d.flush_inode(parent_ino)?;
        Ok(ino)
    }

    pub fn create(&mut self, parent_ino: u64, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<u64> {
        self.make_node(parent_ino, name, mode, uid, gid, InodeKind::Regular)
    }

    pub fn mknod(&mut self, parent_ino: u64, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<u64> {
        self.make_node(parent_ino, name, mode, uid, gid, InodeKind::Regular)
    }

    pub fn symlink(&mut self, parent_ino: u64, name: &[u8], target: &[u8], uid: u32, gid: u32) -> Result<u64> {
        let ino = self.make_node(parent_ino, name, 0o777, uid, gid, InodeKind::Symlink)?;
        if let Err(e) = symlink::set_value(&mut self.d, ino, target) {
            let _ = dir::unlink_dentry(&mut self.d, parent_ino, name);
            let _ = self.d.del_inode(ino);
            return Err(e);
        }
        Ok(ino)
    }

    pub fn readlink(&mut self, ino: u64) -> Result<Vec<u8>> {
        symlink::read_value(&mut self.d, ino)
    }

    pub fn rmdir(&mut self, parent_ino: u64, name: &[u8]) -> Result<()> {
        let ino = namei::lookup_by_name(&mut self.d, parent_ino, name)?.ok_or(Error::NotFound)?;
        if self.d.stage_inode(ino)?.kind != InodeKind::Directory {
            return Err(Error::NotDirectory);
        }
        if !dir::is_empty(&mut self.d, ino)? {
            return Err(Error::NotEmpty);
        }
        dir::unlink_dentry(&mut self.d, parent_ino, name)?;
        let htree_root = self.d_dir_htree_root(ino)?;
        self.d.del_vnode(htree_root)?;
        self.d.del_inode(ino)?;
        let parent = self.d.stage_inode_mut(parent_ino)?;
        parent.nlink = parent.nlink.saturating_sub(1);
        self.d.flush_inode(parent_ino)?;
        Ok(())
    }

    fn d_dir_htree_root(&mut self, ino: u64) -> Result<storage::geometry::Vaddr> {
        self.d
            .stage_inode(ino)?
            .dir_htree_root
            .ok_or_else(|| Error::Storage(storage::Error::corrupted("directory missing htree root")))
    }

    pub fn unlink(&mut self, parent_ino: u64, name: &[u8]) -> Result<()> {
        let ino = dir::unlink_dentry(&mut self.d, parent_ino, name)?;
        let kind = self.d.stage_inode(ino)?.kind;
        if kind == InodeKind::Directory {
            return Err(Error::IsDirectory);
        }
        let nlink_after = {
            let i = self.d.stage_inode_mut(ino)?;
            i.nlink = i.nlink.saturating_sub(1);
            i.nlink
        };
        self.d.flush_inode(ino)?;
        if nlink_after == 0 {
            match kind {
                InodeKind::Regular => file::free_all_data(&mut self.d, ino)?,
                InodeKind::Symlink => symlink::free_tail(&mut self.d, ino)?,
                _ => {}
            }
            xattr::free_all(&mut self.d, ino)?;
            self.d.del_inode(ino)?;
        }
        Ok(())
    }

    pub fn link(&mut self, ino: u64, new_parent_ino: u64, new_name: &[u8]) -> Result<Attr> {
        let kind = self.d.stage_inode(ino)?.kind;
        if kind == InodeKind::Directory {
            return Err(Error::IsDirectory);
        }
        dir::link_dentry(&mut self.d, new_parent_ino, new_name, ino, kind)?;
        let i = self.d.stage_inode_mut(ino)?;
        i.nlink += 1;
        self.d.flush_inode(ino)?;
        inode::getattr(&mut self.d, ino)
    }

    /// Plain rename within (and across) directories: unlink the
    /// destination name if it already exists (files only — spec.md
    /// §12 leaves directory-clobbering rename out of scope for this
    /// engine, matching `original_source`'s `check_rename`'s simpler
    /// non-exchange path), then re-link the source under the new name.
    pub fn rename(&mut self, old_parent: u64, old_name: &[u8], new_parent: u64, new_name: &[u8]) -> Result<()> {
        let ino = dir::unlink_dentry(&mut self.d, old_parent, old_name)?;
        if let Some(victim) = namei::lookup_by_name(&mut self.d, new_parent, new_name)? {
            if self.d.stage_inode(victim)?.kind == InodeKind::Directory {
                return Err(Error::IsDirectory);
            }
            self.unlink(new_parent, new_name)?;
        }
        let kind = self.d.stage_inode(ino)?.kind;
        dir::link_dentry(&mut self.d, new_parent, new_name, ino, kind)?;
        let inode = self.d.stage_inode_mut(ino)?;
        inode.parent_ino = new_parent;
        self.d.flush_inode(ino)?;
        Ok(())
    }

    pub fn readdir(&mut self, ino: u64) -> Result<Vec<Dirent>> {
        dir::readdir(&mut self.d, ino)
    }

    pub fn read(&mut self, ino: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        file::read(&mut self.d, ino, offset, buf)
    }

    pub fn write(&mut self, ino: u64, offset: u64, data: &[u8]) -> Result<usize> {
        file::write(&mut self.d, ino, offset, data)
    }

    pub fn fsync(&mut self, datasync: bool) -> Result<()> {
        self.d
            .commit_dirtyq(storage::commit::CommitFlags { sync: true, datasync, now: false })
            .map_err(Error::from)
    }

    pub fn getxattr(&mut self, ino: u64, name: &[u8]) -> Result<Vec<u8>> {
        xattr::get(&mut self.d, ino, name)
    }

    pub fn setxattr(&mut self, ino: u64, name: &[u8], value: &[u8]) -> Result<()> {
        xattr::set(&mut self.d, ino, name.to_vec(), value.to_vec())
    }

    pub fn listxattr(&mut self, ino: u64) -> Result<Vec<Vec<u8>>> {
        xattr::list(&mut self.d, ino)
    }

    pub fn removexattr(&mut self, ino: u64, name: &[u8]) -> Result<()> {
        xattr::remove(&mut self.d, ino, name)
    }

    pub fn statfs(&mut self) -> Result<StatFs> {
        Ok(StatFs {
            total_uspaces: self.d.usp_index() as u64,
            block_size: storage::geometry::BK_SIZE,
        })
    }
}
