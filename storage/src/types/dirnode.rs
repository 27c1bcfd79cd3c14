//! Directory h-tree node (spec.md §3.5): a fixed-capacity slice of a
//! directory's h-tree, holding packed dentries plus links to sibling/
//! child nodes.

use crate::geometry::KB;
use crate::vtype::HEADER_SIZE;

const TOTAL_SIZE: usize = KB as usize;

/// Inline name length a dentry slot carries (longer names are out of
/// scope for this node type in this layout — directories with long
/// names would need an overflow node, not modelled here).
pub const NAME_INLINE_LEN: usize = 28;

/// How many dentry slots fit in one node after the fixed header fields.
pub const MAX_DENTRIES: usize = 24;

#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct DentrySlot {
    pub ino: u64,
    pub name_len: u8,
    pub dtype: u8,
    _pad: [u8; 2],
    pub name: [u8; NAME_INLINE_LEN],
}

impl DentrySlot {
    pub fn is_free(&self) -> bool {
        self.ino == 0
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }

    pub fn set(&mut self, ino: u64, dtype: u8, name: &[u8]) {
        debug_assert!(name.len() <= NAME_INLINE_LEN);
        self.ino = ino;
        self.dtype = dtype;
        self.name_len = name.len() as u8;
        self.name = [0; NAME_INLINE_LEN];
        self.name[..name.len()].copy_from_slice(name);
    }

    pub fn clear(&mut self) {
        *self = DentrySlot::default();
    }
}

#[repr(C)]
struct DirHtreeNodeBody {
    _header: [u8; HEADER_SIZE],
    parent_ino: u64,
    depth: u32,
    index: u32,
    nents: u32,
    _pad: [u8; 4],
    dents: [DentrySlot; MAX_DENTRIES],
    _tail_pad: [u8; TOTAL_SIZE
        - HEADER_SIZE
        - 8
        - 4 * 3
        - 4
        - MAX_DENTRIES * std::mem::size_of::<DentrySlot>()],
}

/// In-memory handle onto a loaded directory h-tree node.
#[derive(Clone)]
pub struct DirHtreeNode {
    pub parent_ino: u64,
    pub depth: u32,
    pub index: u32,
    pub dents: [DentrySlot; MAX_DENTRIES],
}

impl DirHtreeNode {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new(parent_ino: u64, depth: u32, index: u32) -> Self {
        DirHtreeNode {
            parent_ino,
            depth,
            index,
            dents: [DentrySlot::default(); MAX_DENTRIES],
        }
    }

    pub fn nents(&self) -> u32 {
        self.dents.iter().filter(|d| !d.is_free()).count() as u32
    }

    /// Inserts into the first free slot (spec.md §3.5 "squeeze/merge
    /// discipline" — compaction itself is the operation layer's concern;
    /// this node only exposes slot occupancy).
    pub fn insert(&mut self, ino: u64, dtype: u8, name: &[u8]) -> Option<usize> {
        let slot = self.dents.iter().position(|d| d.is_free())?;
        self.dents[slot].set(ino, dtype, name);
        Some(slot)
    }

    pub fn remove(&mut self, slot: usize) {
        self.dents[slot].clear();
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: DirHtreeNodeBody = unsafe { std::mem::zeroed() };
        body.parent_ino = self.parent_ino;
        body.depth = self.depth;
        body.index = self.index;
        body.nents = self.nents();
        body.dents = self.dents;
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: DirHtreeNodeBody = super::from_bytes(buf);
        DirHtreeNode {
            parent_ino: body.parent_ino,
            depth: body.depth,
            index: body.index,
            dents: body.dents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<DirHtreeNodeBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn insert_remove_roundtrips() {
        let mut node = DirHtreeNode::new(2, 0, 0);
        let slot = node.insert(5, 1, b"hello").unwrap();
        assert_eq!(node.nents(), 1);
        let buf = node.to_buffer();
        let node2 = DirHtreeNode::from_buffer(&buf);
        assert_eq!(node2.dents[slot].name(), b"hello");
        let mut node2 = node2;
        node2.remove(slot);
        assert_eq!(node2.nents(), 0);
    }
}
