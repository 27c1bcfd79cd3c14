//! [C4] Object framing: the typed header every persistent view begins
//! with, and `stamp`/`seal`/`verify` (spec.md §4.4, §6).

use crate::error::{Error, Result};
use crate::vtype::{Vtype, HEADER_SIZE, MAGIC};

/// `{ magic: u32, size: u32, vtype: u16, flags: u16, checksum: u32 }`
/// (spec.md §6, field order/widths as given there), little-endian.
pub struct Header;

impl Header {
    pub fn magic(view: &[u8]) -> u32 {
        u32::from_le_bytes(view[0..4].try_into().unwrap())
    }
    pub fn size(view: &[u8]) -> u32 {
        u32::from_le_bytes(view[4..8].try_into().unwrap())
    }
    pub fn vtype_raw(view: &[u8]) -> u16 {
        u16::from_le_bytes(view[8..10].try_into().unwrap())
    }
    pub fn flags(view: &[u8]) -> u16 {
        u16::from_le_bytes(view[10..12].try_into().unwrap())
    }
    pub fn checksum(view: &[u8]) -> u32 {
        u32::from_le_bytes(view[12..16].try_into().unwrap())
    }

    fn set_magic(view: &mut [u8], v: u32) {
        view[0..4].copy_from_slice(&v.to_le_bytes());
    }
    fn set_size(view: &mut [u8], v: u32) {
        view[4..8].copy_from_slice(&v.to_le_bytes());
    }
    fn set_vtype(view: &mut [u8], v: u16) {
        view[8..10].copy_from_slice(&v.to_le_bytes());
    }
    fn set_flags(view: &mut [u8], v: u16) {
        view[10..12].copy_from_slice(&v.to_le_bytes());
    }
    fn set_checksum(view: &mut [u8], v: u32) {
        view[12..16].copy_from_slice(&v.to_le_bytes());
    }
}

/// `stamp(view, vtype, size)`: zero the view, write magic/size/vtype,
/// clear checksum.
pub fn stamp(view: &mut [u8], vtype: Vtype, size: u32) {
    view.fill(0);
    Header::set_magic(view, MAGIC);
    Header::set_size(view, size);
    Header::set_vtype(view, vtype as u16);
    Header::set_flags(view, 0);
    Header::set_checksum(view, 0);
}

/// `seal(view)`: compute CRC32 of the payload (everything after the
/// header) and store it in `checksum`. No-op for vtypes that skip
/// sealing (data segments — spec.md §4.4).
pub fn seal(view: &mut [u8]) {
    let raw = Header::vtype_raw(view);
    let Some(vtype) = Vtype::from_u16(raw) else {
        return;
    };
    if vtype.skips_seal() {
        return;
    }
    let crc = crate::crypto::crc32(&view[HEADER_SIZE..]);
    Header::set_checksum(view, crc);
}

/// `verify(view, vtype)`: reject when magic, vtype or size disagree with
/// the type table; for non-data views recompute the checksum and
/// compare.
pub fn verify(view: &[u8], expected: Vtype) -> Result<()> {
    if view.len() < HEADER_SIZE {
        return Err(Error::corrupted("view shorter than header"));
    }
    if Header::magic(view) != MAGIC {
        return Err(Error::corrupted("bad magic"));
    }
    let raw = Header::vtype_raw(view);
    if raw != expected as u16 {
        return Err(Error::corrupted(format!(
            "vtype mismatch: expected {:?}, header has {}",
            expected, raw
        )));
    }
    if Header::size(view) as usize != expected.persistent_size() {
        return Err(Error::corrupted("size mismatch against type table"));
    }
    if expected.skips_seal() {
        return Ok(());
    }
    let stored = Header::checksum(view);
    let actual = crate::crypto::crc32(&view[HEADER_SIZE..]);
    if stored != actual {
        return Err(Error::corrupted("checksum mismatch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_seal_verify_roundtrip() {
        let mut view = vec![0u8; Vtype::Inode.persistent_size()];
        stamp(&mut view, Vtype::Inode, Vtype::Inode.persistent_size() as u32);
        view[HEADER_SIZE] = 0x42;
        seal(&mut view);
        verify(&view, Vtype::Inode).unwrap();
    }

    #[test]
    fn tampered_payload_fails_verify() {
        let mut view = vec![0u8; Vtype::Inode.persistent_size()];
        stamp(&mut view, Vtype::Inode, Vtype::Inode.persistent_size() as u32);
        seal(&mut view);
        view[HEADER_SIZE + 1] ^= 0xFF;
        assert!(verify(&view, Vtype::Inode).is_err());
    }

    #[test]
    fn data_segments_skip_checksum() {
        let mut view = vec![0u8; Vtype::Data.persistent_size()];
        stamp(&mut view, Vtype::Data, Vtype::Data.persistent_size() as u32);
        view[HEADER_SIZE] = 0xFF;
        seal(&mut view); // no-op
        assert_eq!(Header::checksum(&view), 0);
        verify(&view, Vtype::Data).unwrap();
    }
}
