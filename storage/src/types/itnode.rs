//! Inode-table node (spec.md §3.10, §4.9): a radix-like node mapping a
//! contiguous ino range to vaddrs, with a free-list of reusable inos
//! threaded through the unused slots.

use crate::geometry::KB;
use crate::vtype::HEADER_SIZE;

use super::vaddr_record::VaddrRecord;

const TOTAL_SIZE: usize = KB as usize;

/// How many inos one leaf table node covers.
pub const SPAN: usize = 24;

#[repr(C)]
struct ItableNodeBody {
    _header: [u8; HEADER_SIZE],
    depth: u8,
    _pad: [u8; 7],
    base_ino: u64,
    /// `0` for a bound slot; otherwise the next free ino in the chain
    /// (`0` also terminates the chain — ino `0` is never allocated).
    free_next: [u64; SPAN],
    slots: [VaddrRecord; SPAN],
    _tail_pad: [u8; TOTAL_SIZE - HEADER_SIZE - 1 - 7 - 8 - SPAN * 8 - SPAN * std::mem::size_of::<VaddrRecord>()],
}

/// In-memory handle onto a loaded inode-table node.
#[derive(Clone)]
pub struct ItableNode {
    pub depth: u8,
    pub base_ino: u64,
    free_next: [u64; SPAN],
    slots: [VaddrRecord; SPAN],
}

impl ItableNode {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new(depth: u8, base_ino: u64) -> Self {
        ItableNode {
            depth,
            base_ino,
            free_next: [0; SPAN],
            slots: [VaddrRecord::NULL; SPAN],
        }
    }

    pub fn covers(&self, ino: u64) -> bool {
        ino >= self.base_ino && ino < self.base_ino + SPAN as u64
    }

    pub fn bind(&mut self, ino: u64, vaddr: crate::geometry::Vaddr) {
        let idx = (ino - self.base_ino) as usize;
        self.slots[idx] = VaddrRecord::from_vaddr(&vaddr);
        self.free_next[idx] = 0;
    }

    pub fn resolve(&self, ino: u64) -> Option<crate::geometry::Vaddr> {
        let idx = (ino - self.base_ino) as usize;
        self.slots.get(idx).and_then(|r| r.to_vaddr())
    }

    /// Unbinds `ino` and pushes it onto this node's free chain, whose
    /// head is `head_free_ino` (0 if the chain was empty); returns the
    /// new head.
    pub fn discard(&mut self, ino: u64, head_free_ino: u64) -> u64 {
        let idx = (ino - self.base_ino) as usize;
        self.slots[idx] = VaddrRecord::NULL;
        self.free_next[idx] = head_free_ino;
        ino
    }

    pub fn next_free_after(&self, ino: u64) -> u64 {
        self.free_next[(ino - self.base_ino) as usize]
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: ItableNodeBody = unsafe { std::mem::zeroed() };
        body.depth = self.depth;
        body.base_ino = self.base_ino;
        body.free_next = self.free_next;
        body.slots = self.slots;
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: ItableNodeBody = super::from_bytes(buf);
        ItableNode {
            depth: body.depth,
            base_ino: body.base_ino,
            free_next: body.free_next,
            slots: body.slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtype::Vtype;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<ItableNodeBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn bind_resolve_discard_roundtrips() {
        let mut node = ItableNode::new(0, 100);
        let v = crate::geometry::Vaddr::new(Vtype::Inode, 4096, 0);
        node.bind(105, v);
        assert_eq!(node.resolve(105), Some(v));
        let head = node.discard(105, 0);
        assert_eq!(head, 105);
        assert_eq!(node.resolve(105), None);
        assert_eq!(node.next_free_after(105), 0);
    }
}
