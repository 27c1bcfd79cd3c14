//! The closed enum of persistent object classes (spec.md §3, §9).
//!
//! spec.md §9 calls for "a tagged-sum over a closed enum; the type table
//! is a `const` array indexed by the enum value" in place of the source's
//! dynamic-dispatch-by-type-tag switches.

use crate::geometry::{AGROUP_MAP_BLOCKS, BK_SIZE, KB, SUPER_BLOCKS, USPACE_MAP_BLOCKS};

/// The header every persistent view begins with (spec.md §4.4, §6).
pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Vtype {
    None = 0,
    Super = 1,
    UspaceMap = 2,
    AgroupMap = 3,
    Inode = 4,
    DirHtreeNode = 5,
    FileRadixNode = 6,
    XattrNode = 7,
    SymlinkTail = 8,
    Data = 9,
    ItableNode = 10,
}

/// Magic stamped into every object header.
pub const MAGIC: u32 = 0x564f_4c54; // "VOLT"

const COUNT: usize = 11;

/// `persistent_size(vtype)` — a type-table constant (spec.md §4.4, §9).
const PERSISTENT_SIZE: [usize; COUNT] = [
    0,                                      // None
    (SUPER_BLOCKS * BK_SIZE) as usize,      // Super
    (USPACE_MAP_BLOCKS * BK_SIZE) as usize, // UspaceMap
    (AGROUP_MAP_BLOCKS * BK_SIZE) as usize, // AgroupMap
    KB as usize,         // Inode
    KB as usize,         // DirHtreeNode
    KB as usize,         // FileRadixNode
    KB as usize,         // XattrNode
    KB as usize,         // SymlinkTail
    BK_SIZE as usize,    // Data: a whole block-sized opaque payload (spec.md §3 item 9)
    KB as usize,         // ItableNode
];

impl Vtype {
    pub fn from_u16(v: u16) -> Option<Self> {
        use Vtype::*;
        Some(match v {
            0 => None,
            1 => Super,
            2 => UspaceMap,
            3 => AgroupMap,
            4 => Inode,
            5 => DirHtreeNode,
            6 => FileRadixNode,
            7 => XattrNode,
            8 => SymlinkTail,
            9 => Data,
            10 => ItableNode,
            _ => return Option::None,
        })
    }

    pub fn persistent_size(&self) -> usize {
        PERSISTENT_SIZE[*self as usize]
    }

    /// Whether this type's view skips sealing/checksum verification
    /// (spec.md §4.4: "Data segments skip sealing... protected by GCM at
    /// the block layer").
    pub fn skips_seal(&self) -> bool {
        matches!(self, Vtype::Data)
    }

    /// Whether this vtype occupies an entire block rather than a cell
    /// range within one managed by an agroup-map.
    pub fn is_map_block(&self) -> bool {
        matches!(self, Vtype::Super | Vtype::UspaceMap | Vtype::AgroupMap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_vtypes() {
        for raw in 0..COUNT as u16 {
            let vt = Vtype::from_u16(raw).unwrap();
            assert_eq!(vt as u16, raw);
        }
        assert!(Vtype::from_u16(COUNT as u16).is_none());
    }

    #[test]
    fn data_skips_seal_others_dont() {
        assert!(Vtype::Data.skips_seal());
        assert!(!Vtype::Inode.skips_seal());
    }
}
