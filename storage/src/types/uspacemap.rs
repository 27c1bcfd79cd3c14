//! Uspace-map (spec.md §3.2): per-AG accounting records and the
//! per-AG `(IV, key)` table used to derive each agroup-map block's key.

use crate::crypto::{CryptoKey, Iv, IV_LEN, KEY_LEN};
use crate::geometry::{AgIndex, BK_SIZE, NUP_AGS, USPACE_MAP_BLOCKS};
use crate::vtype::HEADER_SIZE;

const TOTAL_SIZE: usize = (USPACE_MAP_BLOCKS * BK_SIZE) as usize;

/// Per-AG accounting, one slot per AG covered by this uspace (spec.md
/// §3.2's `{used_meta, used_data, nfiles, formatted}`).
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct AgRecord {
    pub used_meta: u32,
    pub used_data: u32,
    pub nfiles: u32,
    pub formatted: u8,
    _pad: [u8; 3],
}

#[derive(Clone, Copy)]
#[repr(C)]
struct AgKeyRecord {
    iv: [u8; IV_LEN],
    key: [u8; KEY_LEN],
}

#[repr(C)]
struct UspaceMapBody {
    _header: [u8; HEADER_SIZE],
    nused: u64,
    /// Monotonic search hint (spec.md §4.5 step 2: "`usp_index_lo`" — here
    /// reused per-uspace as the AG-record scan cursor).
    search_hint: u64,
    agrecords: [AgRecord; NUP_AGS as usize],
    agkeys: [AgKeyRecord; NUP_AGS as usize],
    _tail_pad: [u8; TOTAL_SIZE
        - HEADER_SIZE
        - 8
        - 8
        - NUP_AGS as usize * std::mem::size_of::<AgRecord>()
        - NUP_AGS as usize * std::mem::size_of::<AgKeyRecord>()],
}

/// In-memory handle onto a loaded uspace-map view.
pub struct UspaceMap {
    pub nused: u64,
    pub search_hint: u64,
    pub agrecords: [AgRecord; NUP_AGS as usize],
    agkeys: [(Iv, CryptoKey); NUP_AGS as usize],
}

impl UspaceMap {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new_formatted() -> Self {
        UspaceMap {
            nused: 0,
            search_hint: 0,
            agrecords: [AgRecord::default(); NUP_AGS as usize],
            agkeys: std::array::from_fn(|_| (Iv::default(), CryptoKey([0; KEY_LEN]))),
        }
    }

    /// Index of the AG record for `ag_index` within its uspace, `0`-based.
    pub fn slot_of(ag_index: AgIndex, first_ag: AgIndex) -> usize {
        (ag_index - first_ag) as usize
    }

    pub fn ag_key(&self, slot: usize) -> (Iv, CryptoKey) {
        self.agkeys[slot].clone()
    }

    pub fn set_ag_key(&mut self, slot: usize, iv: Iv, key: CryptoKey) {
        self.agkeys[slot] = (iv, key);
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: UspaceMapBody = unsafe { std::mem::zeroed() };
        body.nused = self.nused;
        body.search_hint = self.search_hint;
        body.agrecords = self.agrecords;
        for (i, (iv, key)) in self.agkeys.iter().enumerate() {
            body.agkeys[i] = AgKeyRecord { iv: iv.0, key: key.0 };
        }
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: UspaceMapBody = super::from_bytes(buf);
        let agkeys = std::array::from_fn(|i| (Iv(body.agkeys[i].iv), CryptoKey(body.agkeys[i].key)));
        UspaceMap {
            nused: body.nused,
            search_hint: body.search_hint,
            agrecords: body.agrecords,
            agkeys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<UspaceMapBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn ag_key_roundtrips_through_buffer() {
        let mut um = UspaceMap::new_formatted();
        um.set_ag_key(3, Iv([4u8; IV_LEN]), CryptoKey([5u8; KEY_LEN]));
        um.nused = 42;
        let buf = um.to_buffer();
        let um2 = UspaceMap::from_buffer(&buf);
        assert_eq!(um2.nused, 42);
        assert_eq!(um2.ag_key(3).1 .0, [5u8; KEY_LEN]);
    }
}
