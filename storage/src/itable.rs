//! [C9] Inode table (spec.md §4.9): a growable sequence of
//! `ItableNode`s, each covering a contiguous `SPAN`-ino range, with a
//! free-list of reclaimed inos threaded through unbound slots and an
//! apex counter for inos that have never been used.
//!
//! Persistence of the nodes themselves (loading/staging through the
//! cache and crypto-store) is the dispatcher's job (C8); this module
//! only holds the allocation/lookup algorithm over already-decoded
//! nodes.

use crate::error::{Error, Result};
use crate::geometry::Vaddr;
use crate::types::itnode::{ItableNode, SPAN};

/// Ino `1` is reserved for the filesystem root and bound directly via
/// `bind_root_ino` rather than handed out by `acquire_ino`.
pub const ROOT_INO: u64 = 1;

pub struct Itable {
    nodes: Vec<ItableNode>,
    apex_ino: u64,
    free_head: u64,
}

impl Itable {
    pub fn new() -> Self {
        Itable { nodes: Vec::new(), apex_ino: ROOT_INO + 1, free_head: 0 }
    }

    fn node_index_for(&self, ino: u64) -> Option<usize> {
        self.nodes.iter().position(|n| n.covers(ino))
    }

    fn ensure_covers(&mut self, ino: u64) -> usize {
        if let Some(idx) = self.node_index_for(ino) {
            return idx;
        }
        let base = (ino / SPAN as u64) * SPAN as u64;
        self.nodes.push(ItableNode::new(0, base));
        self.nodes.len() - 1
    }

    /// `acquire_ino()`: pop the free list if non-empty, else hand out a
    /// fresh ino from the apex counter, growing the table as needed.
    pub fn acquire_ino(&mut self) -> u64 {
        if self.free_head != 0 {
            let ino = self.free_head;
            let idx = self.node_index_for(ino).expect("free ino must be covered by some node");
            self.free_head = self.nodes[idx].next_free_after(ino);
            return ino;
        }
        let ino = self.apex_ino;
        self.apex_ino += 1;
        self.ensure_covers(ino);
        ino
    }

    pub fn bind_ino(&mut self, ino: u64, vaddr: Vaddr) {
        let idx = self.ensure_covers(ino);
        self.nodes[idx].bind(ino, vaddr);
    }

    pub fn resolve_ino(&self, ino: u64) -> Option<Vaddr> {
        self.node_index_for(ino).and_then(|idx| self.nodes[idx].resolve(ino))
    }

    pub fn discard_ino(&mut self, ino: u64) -> Result<()> {
        let idx = self.node_index_for(ino).ok_or(Error::NotFound)?;
        self.free_head = self.nodes[idx].discard(ino, self.free_head);
        Ok(())
    }

    /// Binds the reserved root ino to `vaddr`, growing the table to
    /// cover it if this is a fresh format.
    pub fn bind_root_ino(&mut self, vaddr: Vaddr) {
        self.bind_ino(ROOT_INO, vaddr);
    }

    pub fn root_vaddr(&self) -> Option<Vaddr> {
        self.resolve_ino(ROOT_INO)
    }

    pub fn nodes(&self) -> &[ItableNode] {
        &self.nodes
    }

    /// Rebuilds an `Itable` from its persisted nodes at mount time
    /// (spec.md §4.9 `reload`). The free-list head isn't persisted
    /// anywhere outside a node's own `free_next` slots, so rather than
    /// trust whatever a previous session last wrote there, `reload`
    /// recomputes the chain from scratch by scanning every unbound
    /// slot in ino order (see DESIGN.md, "inode table free-list head").
    pub fn reload(nodes: Vec<ItableNode>) -> Self {
        let mut table = Itable { nodes, apex_ino: ROOT_INO + 1, free_head: 0 };
        for idx in 0..table.nodes.len() {
            let base = table.nodes[idx].base_ino;
            for i in 0..SPAN as u64 {
                let ino = base + i;
                if ino <= ROOT_INO {
                    continue;
                }
                if table.nodes[idx].resolve(ino).is_none() {
                    let head = table.free_head;
                    table.free_head = table.nodes[idx].discard(ino, head);
                } else if ino >= table.apex_ino {
                    table.apex_ino = ino + 1;
                }
            }
        }
        table
    }
}

impl Default for Itable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtype::Vtype;

    fn dummy_vaddr(lba: u64) -> Vaddr {
        Vaddr::new(Vtype::Inode, lba, 0)
    }

    #[test]
    fn acquire_then_bind_then_resolve_roundtrips() {
        let mut t = Itable::new();
        let ino = t.acquire_ino();
        assert_ne!(ino, ROOT_INO);
        t.bind_ino(ino, dummy_vaddr(4096));
        assert_eq!(t.resolve_ino(ino), Some(dummy_vaddr(4096)));
    }

    #[test]
    fn discarded_ino_is_reused_before_apex_grows() {
        let mut t = Itable::new();
        let a = t.acquire_ino();
        t.bind_ino(a, dummy_vaddr(4096));
        t.discard_ino(a).unwrap();
        let b = t.acquire_ino();
        assert_eq!(a, b, "freed inos should be reused ahead of the apex counter");
    }

    #[test]
    fn root_ino_is_never_handed_out_by_acquire() {
        let mut t = Itable::new();
        t.bind_root_ino(dummy_vaddr(0));
        for _ in 0..50 {
            assert_ne!(t.acquire_ino(), ROOT_INO);
        }
    }

    #[test]
    fn reload_recovers_apex_and_free_chain() {
        let mut t = Itable::new();
        t.bind_root_ino(dummy_vaddr(0));
        let a = t.acquire_ino();
        let b = t.acquire_ino();
        t.bind_ino(a, dummy_vaddr(1));
        t.bind_ino(b, dummy_vaddr(2));
        t.discard_ino(a).unwrap();

        let reloaded = Itable::reload(t.nodes().to_vec());
        assert_eq!(reloaded.resolve_ino(b), Some(dummy_vaddr(2)));
        assert_eq!(reloaded.resolve_ino(a), None);
        assert!(reloaded.apex_ino > b);
    }
}
