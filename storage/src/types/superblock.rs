//! Super block (spec.md §3.1): volume UUID, format version, birth time,
//! the per-uspace key table used to derive each uspace-map block's
//! `(IV, key)`, and the inode table's root handle.

use crate::crypto::{CryptoKey, Iv, IV_LEN, KEY_LEN};
use crate::geometry::{UspIndex, Vaddr, BK_SIZE, NUSP_MAX, SUPER_BLOCKS};
use crate::vtype::HEADER_SIZE;

use super::vaddr_record::VaddrRecord;

/// Format version stamped into every freshly formatted volume. Chosen as
/// the Open Question resolution in spec.md §9 ("two generations... not
/// wire-compatible... pick one and stamp it"); see DESIGN.md.
pub const FORMAT_VERSION: u32 = 1;

const TOTAL_SIZE: usize = (SUPER_BLOCKS * BK_SIZE) as usize;

/// One uspace's `(IV, key)` pair, as stored in the super-block's table.
#[derive(Clone, Copy)]
#[repr(C)]
struct UspKeyRecord {
    iv: [u8; IV_LEN],
    key: [u8; KEY_LEN],
}

const UNUSED_HEADER_TAIL: usize = HEADER_SIZE;

#[repr(C)]
struct SuperblockBody {
    // Bytes [0, HEADER_SIZE) are the framing header, left zeroed in this
    // struct and stamped separately by `framing::stamp`/`seal` over the
    // whole buffer; see `Superblock::to_buffer`.
    _header: [u8; UNUSED_HEADER_TAIL],
    uuid: [u8; 16],
    format_version: u32,
    birth_time_secs: u64,
    master_iv: [u8; IV_LEN],
    _pad_master: [u8; 4],
    uspace_keys: [UspKeyRecord; NUSP_MAX as usize],
    root_itable_vaddr: VaddrRecord,
    _tail_pad: [u8; TOTAL_SIZE
        - UNUSED_HEADER_TAIL
        - 16
        - 4
        - 8
        - IV_LEN
        - 4
        - NUSP_MAX as usize * std::mem::size_of::<UspKeyRecord>()
        - std::mem::size_of::<VaddrRecord>()],
}

/// In-memory handle onto a loaded super-block view.
pub struct Superblock {
    pub uuid: [u8; 16],
    pub format_version: u32,
    pub birth_time_secs: u64,
    pub master_iv: Iv,
    uspace_keys: Vec<(Iv, CryptoKey)>,
    pub root_itable_vaddr: Option<Vaddr>,
}

impl Superblock {
    pub const PERSISTENT_SIZE: usize = TOTAL_SIZE;

    pub fn new_formatted(uuid: [u8; 16], master_iv: Iv, birth_time_secs: u64) -> Self {
        Superblock {
            uuid,
            format_version: FORMAT_VERSION,
            birth_time_secs,
            master_iv,
            uspace_keys: vec![(Iv::default(), CryptoKey([0; KEY_LEN])); NUSP_MAX as usize],
            root_itable_vaddr: None,
        }
    }

    pub fn uspace_key(&self, usp_index: UspIndex) -> (Iv, CryptoKey) {
        self.uspace_keys[(usp_index - 1) as usize].clone()
    }

    pub fn set_uspace_key(&mut self, usp_index: UspIndex, iv: Iv, key: CryptoKey) {
        self.uspace_keys[(usp_index - 1) as usize] = (iv, key);
    }

    /// Encodes this super-block into a fresh `PERSISTENT_SIZE`-byte
    /// buffer. The header (first 16 bytes) is left zeroed — callers stamp
    /// it via `framing::stamp`/`seal`.
    pub fn to_buffer(&self) -> Vec<u8> {
        let mut body: SuperblockBody = unsafe { std::mem::zeroed() };
        body.uuid = self.uuid;
        body.format_version = self.format_version;
        body.birth_time_secs = self.birth_time_secs;
        body.master_iv = self.master_iv.0;
        for (i, (iv, key)) in self.uspace_keys.iter().enumerate() {
            body.uspace_keys[i] = UspKeyRecord { iv: iv.0, key: key.0 };
        }
        body.root_itable_vaddr = self
            .root_itable_vaddr
            .as_ref()
            .map(VaddrRecord::from_vaddr)
            .unwrap_or(VaddrRecord::NULL);
        super::as_bytes(&body).to_vec()
    }

    pub fn from_buffer(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), TOTAL_SIZE);
        let body: SuperblockBody = super::from_bytes(buf);
        let uspace_keys = body
            .uspace_keys
            .iter()
            .map(|r| (Iv(r.iv), CryptoKey(r.key)))
            .collect();
        Superblock {
            uuid: body.uuid,
            format_version: body.format_version,
            birth_time_secs: body.birth_time_secs,
            master_iv: Iv(body.master_iv),
            uspace_keys,
            root_itable_vaddr: body.root_itable_vaddr.to_vaddr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_size_matches_type_table_budget() {
        assert!(std::mem::size_of::<SuperblockBody>() <= TOTAL_SIZE);
    }

    #[test]
    fn roundtrips_through_buffer() {
        let mut sb = Superblock::new_formatted([7u8; 16], Iv([9u8; IV_LEN]), 123);
        sb.set_uspace_key(1, Iv([1u8; IV_LEN]), CryptoKey([2u8; KEY_LEN]));
        let buf = sb.to_buffer();
        assert_eq!(buf.len(), Superblock::PERSISTENT_SIZE);
        let sb2 = Superblock::from_buffer(&buf);
        assert_eq!(sb2.uuid, sb.uuid);
        assert_eq!(sb2.uspace_key(1).1 .0, [2u8; KEY_LEN]);
    }
}
