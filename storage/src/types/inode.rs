//! Inode (spec.md §3.4): common fields plus a type-specific tail for
//! directory/regular-file/symlink kinds.

use crate::geometry::KB;
use crate::vtype::HEADER_SIZE;

use super::vaddr_record::VaddrRecord;

const TOTAL_SIZE: usize = KB as usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum InodeKind {
    Directory = 0,
    Regular = 1,
    Symlink = 2,
    Other = 3,
}

impl InodeKind {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => InodeKind::Directory,
            1 => InodeKind::Regular,
            2 => InodeKind::Symlink,
            _ => InodeKind::Other,
        }
    }
}

/// Inline symlink value length kept in the inode itself before spilling
/// into a symlink-tail node (spec.md §3.8 "inline head + tail offsets").
pub const SYMLINK_INLINE_LEN: usize = 40;

#[repr(C)]
struct InodeBody {
    _header: [u8; HEADER_SIZE],
    ino: u64,
    parent_ino: u64,
    uid: u32,
    gid: u32,
    mode: u32,
    size: u64,
    blocks: u64,
    nlink: u32,
    flags: u32,
    btime: u64,
    atime: u64,
    mtime: u64,
    ctime: u64,
    kind: u8,
    _pad_kind: [u8; 7],
    dir_htree_root: VaddrRecord,
    dir_last_index: u64,
    dir_ndents: u32,
    dir_flags: u32,
    file_radix_root: VaddrRecord,
    file_tree_height: u32,
    _pad_file: [u8; 4],
    symlink_inline_head: [u8; SYMLINK_INLINE_LEN],
    symlink_tail: VaddrRecord,
    xattr_root: VaddrRecord,
    _tail_pad: [u8; TOTAL_SIZE
        - HEADER_SIZE
        - 8 * 2 // ino, parent_ino
        - 4 * 3 // uid, gid, mode
        - 8 * 2 // size, blocks
        - 4 * 2 // nlink, flags
        - 8 * 4 // btime, atime, mtime, ctime
        - 1
        - 7
        - std::mem::size_of::<VaddrRecord>() * 4
        - 8
        - 4 * 3
        - 4
        - SYMLINK_INLINE_LEN],
}

/// In-memory handle onto a loaded inode view.
#[derive(Clone)]
pub struct Inode {
    pub ino: u64,
    pub parent_ino: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub flags: u32,
    pub btime: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub kind: InodeKind,
    pub dir_htree_root: Option<crate::geometry::Vaddr>,
    pub dir_last_index: u64,
    pub dir_ndents: u32,
    pub dir_flags: u32,
    pub file_radix_root: Option<crate::geometry::Vaddr>,
    pub file_tree_height: u32,
    pub symlink_inline_head: [u8; SYMLINK_INLINE_LEN],
    pub symlink_tail: Option<crate::geometry::Vaddr>,
    pub xattr_root: Option<crate::geometry::Vaddr>,
}

impl Inode {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new(ino: u64, parent_ino: u64, mode: u32, uid: u32, gid: u32, kind: InodeKind, now: u64) -> Self {
        Inode {
            ino,
            parent_ino,
            uid,
            gid,
            mode,
            size: 0,
            blocks: 0,
            nlink: if kind == InodeKind::Directory { 2 } else { 1 },
            flags: 0,
            btime: now,
            atime: now,
            mtime: now,
            ctime: now,
            kind,
            dir_htree_root: None,
            dir_last_index: 0,
            dir_ndents: 0,
            dir_flags: 0,
            file_radix_root: None,
            file_tree_height: 0,
            symlink_inline_head: [0; SYMLINK_INLINE_LEN],
            symlink_tail: None,
            xattr_root: None,
        }
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: InodeBody = unsafe { std::mem::zeroed() };
        body.ino = self.ino;
        body.parent_ino = self.parent_ino;
        body.uid = self.uid;
        body.gid = self.gid;
        body.mode = self.mode;
        body.size = self.size;
        body.blocks = self.blocks;
        body.nlink = self.nlink;
        body.flags = self.flags;
        body.btime = self.btime;
        body.atime = self.atime;
        body.mtime = self.mtime;
        body.ctime = self.ctime;
        body.kind = self.kind as u8;
        body.dir_htree_root = self
            .dir_htree_root
            .as_ref()
            .map(VaddrRecord::from_vaddr)
            .unwrap_or(VaddrRecord::NULL);
        body.dir_last_index = self.dir_last_index;
        body.dir_ndents = self.dir_ndents;
        body.dir_flags = self.dir_flags;
        body.file_radix_root = self
            .file_radix_root
            .as_ref()
            .map(VaddrRecord::from_vaddr)
            .unwrap_or(VaddrRecord::NULL);
        body.file_tree_height = self.file_tree_height;
        body.symlink_inline_head = self.symlink_inline_head;
        body.symlink_tail = self
            .symlink_tail
            .as_ref()
            .map(VaddrRecord::from_vaddr)
            .unwrap_or(VaddrRecord::NULL);
        body.xattr_root = self
            .xattr_root
            .as_ref()
            .map(VaddrRecord::from_vaddr)
            .unwrap_or(VaddrRecord::NULL);
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: InodeBody = super::from_bytes(buf);
        Inode {
            ino: body.ino,
            parent_ino: body.parent_ino,
            uid: body.uid,
            gid: body.gid,
            mode: body.mode,
            size: body.size,
            blocks: body.blocks,
            nlink: body.nlink,
            flags: body.flags,
            btime: body.btime,
            atime: body.atime,
            mtime: body.mtime,
            ctime: body.ctime,
            kind: InodeKind::from_u8(body.kind),
            dir_htree_root: body.dir_htree_root.to_vaddr(),
            dir_last_index: body.dir_last_index,
            dir_ndents: body.dir_ndents,
            dir_flags: body.dir_flags,
            file_radix_root: body.file_radix_root.to_vaddr(),
            file_tree_height: body.file_tree_height,
            symlink_inline_head: body.symlink_inline_head,
            symlink_tail: body.symlink_tail.to_vaddr(),
            xattr_root: body.xattr_root.to_vaddr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<InodeBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn roundtrips_through_buffer() {
        let mut ino = Inode::new(5, 2, 0o755, 1000, 1000, InodeKind::Regular, 1000);
        ino.size = 4096;
        let buf = ino.to_buffer();
        assert_eq!(buf.len(), Inode::PERSISTENT_SIZE);
        let ino2 = Inode::from_buffer(&buf);
        assert_eq!(ino2.ino, 5);
        assert_eq!(ino2.size, 4096);
        assert_eq!(ino2.kind, InodeKind::Regular);
        assert_eq!(ino2.nlink, 1);
    }
}
