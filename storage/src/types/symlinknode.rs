//! Symlink-tail node (spec.md §3.8): the overflow portion of a symlink
//! value that doesn't fit in the inode's inline head.

use crate::geometry::KB;
use crate::vtype::HEADER_SIZE;

const TOTAL_SIZE: usize = KB as usize;

/// Maximum tail bytes a symlink-tail node can hold.
pub const L_PART: usize = TOTAL_SIZE - HEADER_SIZE - 8 - 2;

#[repr(C)]
struct SymlinkTailBody {
    _header: [u8; HEADER_SIZE],
    parent_ino: u64,
    len: u16,
    tail: [u8; L_PART],
}

/// In-memory handle onto a loaded symlink-tail node.
#[derive(Clone)]
pub struct SymlinkTailNode {
    pub parent_ino: u64,
    pub value: Vec<u8>,
}

impl SymlinkTailNode {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new(parent_ino: u64, value: Vec<u8>) -> Self {
        debug_assert!(value.len() <= L_PART);
        SymlinkTailNode { parent_ino, value }
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: SymlinkTailBody = unsafe { std::mem::zeroed() };
        body.parent_ino = self.parent_ino;
        body.len = self.value.len() as u16;
        body.tail[..self.value.len()].copy_from_slice(&self.value);
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: SymlinkTailBody = super::from_bytes(buf);
        SymlinkTailNode {
            parent_ino: body.parent_ino,
            value: body.tail[..body.len as usize].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<SymlinkTailBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn roundtrips_through_buffer() {
        let node = SymlinkTailNode::new(7, b"/some/long/target/path".to_vec());
        let buf = node.to_buffer();
        let node2 = SymlinkTailNode::from_buffer(&buf);
        assert_eq!(node2.parent_ino, 7);
        assert_eq!(node2.value, b"/some/long/target/path");
    }
}
