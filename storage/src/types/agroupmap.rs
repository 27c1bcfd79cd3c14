//! Agroup-map (spec.md §3.3, §4.5): per-block bkrefs, each carrying the
//! block's `(IV, key)` plus a boctet per block-octet describing
//! cell-grained occupancy.

use crate::crypto::{CryptoKey, Iv, IV_LEN, KEY_LEN};
use crate::geometry::{AGROUP_MAP_BLOCKS, BK_SIZE, BO_PER_BK, DATA_BLOCKS_PER_AG};
use crate::vtype::{Vtype, HEADER_SIZE};

const TOTAL_SIZE: usize = (AGROUP_MAP_BLOCKS * BK_SIZE) as usize;

/// One block-octet's allocation state: 8-bit cell usemask, the `vtype`
/// occupying it (when not fully free), a single unwritten flag for the
/// whole octet, and a reference count (spec.md §3.3, §4.5 step 4).
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct Boctet {
    vtype: u8,
    pub usemask: u8,
    unwritten: u8,
    pub refcnt: u8,
}

impl Boctet {
    pub fn vtype(&self) -> Option<Vtype> {
        Vtype::from_u16(self.vtype as u16)
    }

    pub fn set_vtype(&mut self, vt: Vtype) {
        self.vtype = vt as u8;
    }

    pub fn is_unwritten(&self) -> bool {
        self.unwritten != 0
    }

    pub fn set_unwritten(&mut self, v: bool) {
        self.unwritten = v as u8;
    }

    pub fn is_free(&self) -> bool {
        self.usemask == 0
    }
}

/// Per-block record: the block's `(IV, key)` plus its `BO_PER_BK`
/// boctets (spec.md §3.3 "a bkref contains 8 boctets (a full block)").
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Bkref {
    iv: [u8; IV_LEN],
    key: [u8; KEY_LEN],
    pub boctets: [Boctet; BO_PER_BK as usize],
}

impl Bkref {
    pub fn iv(&self) -> Iv {
        Iv(self.iv)
    }

    pub fn key(&self) -> CryptoKey {
        CryptoKey(self.key)
    }

    pub fn set_key(&mut self, iv: Iv, key: CryptoKey) {
        self.iv = iv.0;
        self.key = key.0;
    }

    /// Whether every boctet in this bkref is fully free — the block is
    /// not referencing any live cell and its `(IV, key)` may be renewed
    /// the next time it is reused (spec.md §4.5 step 5).
    pub fn is_empty(&self) -> bool {
        self.boctets.iter().all(|b| b.is_free())
    }
}

impl Default for Bkref {
    fn default() -> Self {
        Bkref {
            iv: [0; IV_LEN],
            key: [0; KEY_LEN],
            boctets: [Boctet::default(); BO_PER_BK as usize],
        }
    }
}

#[repr(C)]
struct AgroupMapBody {
    _header: [u8; HEADER_SIZE],
    nkb_used: u64,
    cipher_id: u16,
    _pad: [u8; 6],
    bkrefs: [Bkref; DATA_BLOCKS_PER_AG as usize],
    _tail_pad: [u8; TOTAL_SIZE
        - HEADER_SIZE
        - 8
        - 2
        - 6
        - DATA_BLOCKS_PER_AG as usize * std::mem::size_of::<Bkref>()],
}

/// In-memory handle onto a loaded agroup-map view.
pub struct AgroupMap {
    pub nkb_used: u64,
    pub cipher_id: u16,
    bkrefs: Vec<Bkref>,
}

impl AgroupMap {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new_formatted() -> Self {
        AgroupMap {
            nkb_used: 0,
            cipher_id: 0,
            bkrefs: vec![Bkref::default(); DATA_BLOCKS_PER_AG as usize],
        }
    }

    /// Bkref for the block at `data_lba_offset` — an index into the
    /// AG's bkref table (0-based, counting data blocks only; the
    /// leading `AGROUP_MAP_BLOCKS` themselves carry no bkref).
    pub fn bkref(&self, slot: usize) -> &Bkref {
        &self.bkrefs[slot]
    }

    pub fn bkref_mut(&mut self, slot: usize) -> &mut Bkref {
        &mut self.bkrefs[slot]
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: AgroupMapBody = unsafe { std::mem::zeroed() };
        body.nkb_used = self.nkb_used;
        body.cipher_id = self.cipher_id;
        body.bkrefs.copy_from_slice(&self.bkrefs);
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: AgroupMapBody = super::from_bytes(buf);
        AgroupMap {
            nkb_used: body.nkb_used,
            cipher_id: body.cipher_id,
            bkrefs: body.bkrefs.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<AgroupMapBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn fresh_bkref_is_empty() {
        let am = AgroupMap::new_formatted();
        assert!(am.bkref(0).is_empty());
    }

    #[test]
    fn bkref_key_roundtrips_through_buffer() {
        let mut am = AgroupMap::new_formatted();
        am.bkref_mut(5).set_key(Iv([3u8; IV_LEN]), CryptoKey([6u8; KEY_LEN]));
        am.bkref_mut(5).boctets[0].set_vtype(Vtype::Data);
        am.bkref_mut(5).boctets[0].usemask = 0b0000_0001;
        am.nkb_used = 1;
        let buf = am.to_buffer();
        let am2 = AgroupMap::from_buffer(&buf);
        assert_eq!(am2.nkb_used, 1);
        assert_eq!(am2.bkref(5).key().0, [6u8; KEY_LEN]);
        assert!(!am2.bkref(5).is_empty());
        assert_eq!(am2.bkref(5).boctets[0].vtype(), Some(Vtype::Data));
    }
}
