//! Inode attribute operations (spec.md §12, grounded on
//! `original_source/attic/voluta/lib/inode.c`).

use storage::dispatcher::Dispatcher;
use storage::types::inode::InodeKind;

use crate::error::Result;

#[derive(Clone, Copy)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub kind: InodeKind,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub btime: u64,
}

pub fn getattr(d: &mut Dispatcher, ino: u64) -> Result<Attr> {
    let i = d.stage_inode(ino)?;
    Ok(Attr {
        ino: i.ino,
        size: i.size,
        blocks: i.blocks,
        nlink: i.nlink,
        mode: i.mode,
        uid: i.uid,
        gid: i.gid,
        kind: i.kind,
        atime: i.atime,
        mtime: i.mtime,
        ctime: i.ctime,
        btime: i.btime,
    })
}

/// Optional attribute overrides for `setattr` (spec.md §12 `setattr`);
/// `None` leaves the existing field untouched.
#[derive(Default)]
pub struct AttrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<u64>,
    pub mtime: Option<u64>,
}

pub fn setattr(d: &mut Dispatcher, ino: u64, changes: AttrChanges) -> Result<Attr> {
    let now = storage::util::get_timestamp().as_secs();
    {
        let i = d.stage_inode_mut(ino)?;
        if let Some(m) = changes.mode {
            i.mode = (i.mode & !0o7777) | (m & 0o7777);
        }
        if let Some(u) = changes.uid {
            i.uid = u;
        }
        if let Some(g) = changes.gid {
            i.gid = g;
        }
        if let Some(a) = changes.atime {
            i.atime = a;
        }
        if let Some(m) = changes.mtime {
            i.mtime = m;
        }
        i.ctime = now;
    }
    if let Some(size) = changes.size {
        crate::file::truncate(d, ino, size)?;
    }
    d.flush_inode(ino)?;
    getattr(d, ino)
}
