//! The two-level bitmap allocator (spec.md §4.5): `allocate`/`deallocate`
//! over a loaded uspace-map's AG records and a loaded agroup-map's
//! bkrefs. Picking *which* agroup-map to load is this module's job
//! (`select_ag_slot`); loading it through the cache/crypto-store is the
//! dispatcher's (C8).

use crate::crypto;
use crate::error::{Error, Result};
use crate::geometry::{DATA_BLOCKS_PER_AG, NUP_AGS};
use crate::types::agroupmap::AgroupMap;
use crate::types::uspacemap::UspaceMap;
use crate::util::ceil_division;
use crate::vtype::Vtype;

const CELLS_PER_BO: u64 = crate::geometry::CELLS_PER_BO;
const CELLS_PER_BK: u64 = crate::geometry::CELLS_PER_BK;

fn capacity_kb() -> u64 {
    DATA_BLOCKS_PER_AG * crate::geometry::CELLS_PER_BK
}

/// `nkb` for a vaddr of this type (spec.md §4.5 step 1). Only
/// non-map types are dynamically allocated through this path — the
/// super-block, uspace-maps and agroup-maps live at fixed, reserved
/// offsets instead.
fn nkb_of(vtype: Vtype) -> u64 {
    debug_assert!(!vtype.is_map_block(), "map blocks are not cell-allocated");
    ceil_division(vtype.persistent_size() as u64, crate::geometry::KB)
}

/// Result of a successful `allocate`: where the cells landed within the
/// chosen agroup-map, in units the dispatcher can turn into a `Vaddr`.
#[derive(Debug, Clone, Copy)]
pub struct AllocOutcome {
    /// Index of the AG record within its uspace-map (spec.md §4.5 step 2).
    pub ag_slot: usize,
    /// Index into the agroup-map's bkref table (one per data block).
    pub bkref_slot: usize,
    /// First cell index within the block, `kbn ∈ [0, CELLS_PER_BK)`.
    pub kbn: u8,
    pub nkb: u64,
}

/// spec.md §4.5 step 2: "the uspace-map keeps a monotonic search-hint
/// `usp_index_lo`; within an uspace-map, iterate agroup records starting
/// from the hint, skipping unformatted or short-of-space records."
fn select_ag_slot(usp: &mut UspaceMap) -> Option<usize> {
    let cap = capacity_kb();
    for step in 0..NUP_AGS {
        let slot = ((usp.search_hint + step) % NUP_AGS) as usize;
        let rec = &usp.agrecords[slot];
        if rec.formatted == 0 {
            continue;
        }
        if (rec.used_meta as u64 + rec.used_data as u64) < cap {
            usp.search_hint = slot as u64;
            return Some(slot);
        }
    }
    None
}

/// Finds an `nkb`-aligned free run of bits in `boctet`'s usemask that
/// either belongs to no type yet or already holds the same `vtype`
/// (spec.md §4.5 step 4 — "to pack same-typed objects").
fn find_run_in_boctet(
    boctet: &crate::types::agroupmap::Boctet,
    nkb: u64,
    vtype: Vtype,
) -> Option<u8> {
    if !boctet.is_free() && boctet.vtype() != Some(vtype) {
        return None;
    }
    let mut start = 0u64;
    while start + nkb <= CELLS_PER_BO {
        let mask: u8 = (((1u16 << nkb) - 1) << start) as u8;
        if boctet.usemask & mask == 0 {
            return Some(start as u8);
        }
        start += nkb;
    }
    None
}

/// Whole-block allocation (spec.md §4.5 step 4, the "favour append"
/// branch): a vtype whose `persistent_size` is a full `B` spans both
/// boctets of its bkref at once, so it can only ever land in a bkref
/// that is entirely free. Scanned back-to-front so growth favors the
/// tail of the AG rather than fragmenting already-partly-used bkrefs.
fn allocate_whole_block(am: &mut AgroupMap, vtype: Vtype) -> Option<(usize, u8)> {
    let n = DATA_BLOCKS_PER_AG as usize;
    for slot in (0..n).rev() {
        let bkref = am.bkref_mut(slot);
        if !bkref.is_empty() {
            continue;
        }
        for boctet in bkref.boctets.iter_mut() {
            boctet.usemask = 0xFF;
            boctet.set_vtype(vtype);
            boctet.refcnt = boctet.refcnt.saturating_add(1);
            if vtype == Vtype::Data {
                boctet.set_unwritten(true);
            }
        }
        bkref.set_key(crypto::random_iv(), crypto::random_key());
        return Some((slot, 0));
    }
    None
}

/// spec.md §4.5 steps 3-5, within one already-selected agroup-map.
fn allocate_in_agroup(am: &mut AgroupMap, vtype: Vtype, favor_append: bool) -> Option<(usize, u8)> {
    let nkb = nkb_of(vtype);
    if nkb == CELLS_PER_BK {
        return allocate_whole_block(am, vtype);
    }
    debug_assert!(nkb <= CELLS_PER_BO, "fine allocator only handles sub-boctet sizes");

    let n = DATA_BLOCKS_PER_AG as usize;
    // Fine-grained requests scan partially-used bkrefs first so that a
    // block already carrying live cells absorbs more before a fresh one
    // is touched; whole-block-ish requests start from a heuristic
    // position favouring append-like growth instead.
    let order: Box<dyn Iterator<Item = usize>> = if favor_append {
        Box::new((0..n).rev())
    } else {
        let partial: Vec<usize> = (0..n).filter(|&i| !am.bkref(i).is_empty()).collect();
        let rest: Vec<usize> = (0..n).filter(|&i| am.bkref(i).is_empty()).collect();
        Box::new(partial.into_iter().chain(rest))
    };

    for slot in order {
        let bkref = am.bkref_mut(slot);
        let was_empty = bkref.is_empty();
        for (bo_idx, boctet) in bkref.boctets.iter_mut().enumerate() {
            if let Some(bit) = find_run_in_boctet(boctet, nkb, vtype) {
                let mask: u8 = (((1u16 << nkb) - 1) << bit) as u8;
                boctet.usemask |= mask;
                boctet.set_vtype(vtype);
                boctet.refcnt = boctet.refcnt.saturating_add(1);
                if vtype == Vtype::Data {
                    boctet.set_unwritten(true);
                }
                if was_empty {
                    bkref.set_key(crypto::random_iv(), crypto::random_key());
                }
                let kbn = bo_idx as u8 * CELLS_PER_BO as u8 + bit;
                return Some((slot, kbn));
            }
        }
    }
    None
}

/// `allocate(vtype)` (spec.md §4.5): picks an AG via the uspace-map's
/// search hint, then a cell run within it, marks it used and propagates
/// accounting up to the uspace-map.
pub fn allocate(vtype: Vtype, usp: &mut UspaceMap, am: &mut AgroupMap) -> Result<AllocOutcome> {
    let nkb = nkb_of(vtype);
    let ag_slot = select_ag_slot(usp).ok_or(Error::NoSpace)?;
    let favor_append = nkb >= CELLS_PER_BO;
    let (bkref_slot, kbn) =
        allocate_in_agroup(am, vtype, favor_append).ok_or(Error::NoSpace)?;

    am.nkb_used += nkb;
    let rec = &mut usp.agrecords[ag_slot];
    if vtype == Vtype::Data {
        rec.used_data += nkb as u32;
    } else {
        rec.used_meta += nkb as u32;
        if vtype == Vtype::Inode {
            rec.nfiles += 1;
        }
    }
    usp.nused += nkb * crate::geometry::KB;

    Ok(AllocOutcome { ag_slot, bkref_slot, kbn, nkb })
}

/// `deallocate(vaddr)` (spec.md §4.5): symmetric to `allocate`.
pub fn deallocate(
    outcome: AllocOutcome,
    vtype: Vtype,
    usp: &mut UspaceMap,
    am: &mut AgroupMap,
) -> Result<()> {
    let bkref = am.bkref_mut(outcome.bkref_slot);
    if outcome.nkb == CELLS_PER_BK {
        for boctet in bkref.boctets.iter_mut() {
            if boctet.usemask != 0xFF {
                return Err(Error::corrupted("deallocate: cells were not marked used"));
            }
            boctet.usemask = 0;
            boctet.refcnt = boctet.refcnt.saturating_sub(1);
            boctet.set_vtype(Vtype::None);
            boctet.set_unwritten(false);
        }
    } else {
        let bo_idx = (outcome.kbn as u64 / CELLS_PER_BO) as usize;
        let bit = outcome.kbn as u64 % CELLS_PER_BO;
        let boctet = &mut bkref.boctets[bo_idx];
        let mask: u8 = (((1u16 << outcome.nkb) - 1) << bit) as u8;
        if boctet.usemask & mask != mask {
            return Err(Error::corrupted("deallocate: cells were not marked used"));
        }
        boctet.usemask &= !mask;
        boctet.refcnt = boctet.refcnt.saturating_sub(1);
        if boctet.is_free() {
            boctet.set_vtype(Vtype::None);
            boctet.set_unwritten(false);
        }
    }

    if bkref.is_empty() {
        bkref.set_key(crypto::random_iv(), crypto::random_key());
    }

    am.nkb_used = am.nkb_used.saturating_sub(outcome.nkb);
    let rec = &mut usp.agrecords[outcome.ag_slot];
    if vtype == Vtype::Data {
        rec.used_data = rec.used_data.saturating_sub(outcome.nkb as u32);
    } else {
        rec.used_meta = rec.used_meta.saturating_sub(outcome.nkb as u32);
        if vtype == Vtype::Inode {
            rec.nfiles = rec.nfiles.saturating_sub(1);
        }
    }
    usp.nused = usp.nused.saturating_sub(outcome.nkb * crate::geometry::KB);
    Ok(())
}

/// Formats a fresh AG record: marks it formatted with zero usage so
/// `select_ag_slot` will consider it (spec.md §4.5 "Formatting").
pub fn format_ag_record(usp: &mut UspaceMap, ag_slot: usize) {
    let rec = &mut usp.agrecords[ag_slot];
    rec.formatted = 1;
    rec.used_meta = 0;
    rec.used_data = 0;
    rec.nfiles = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_pair() -> (UspaceMap, AgroupMap) {
        let mut usp = UspaceMap::new_formatted();
        for slot in 0..NUP_AGS as usize {
            format_ag_record(&mut usp, slot);
        }
        (usp, AgroupMap::new_formatted())
    }

    #[test]
    fn allocate_then_deallocate_returns_accounting_to_baseline() {
        let (mut usp, mut am) = fresh_pair();
        let baseline_nused = usp.nused;
        let baseline_kb_used = am.nkb_used;

        let outcome = allocate(Vtype::Inode, &mut usp, &mut am).unwrap();
        assert_eq!(outcome.nkb, 1);
        assert!(am.nkb_used > baseline_kb_used);

        deallocate(outcome, Vtype::Inode, &mut usp, &mut am).unwrap();
        assert_eq!(usp.nused, baseline_nused);
        assert_eq!(am.nkb_used, baseline_kb_used);
        assert!(am.bkref(outcome.bkref_slot).is_empty());
    }

    #[test]
    fn same_vtype_packs_into_shared_boctet() {
        let (mut usp, mut am) = fresh_pair();
        let a = allocate(Vtype::XattrNode, &mut usp, &mut am).unwrap();
        let b = allocate(Vtype::XattrNode, &mut usp, &mut am).unwrap();
        assert_eq!(a.bkref_slot, b.bkref_slot, "same-typed objects should pack together");
        assert_ne!(a.kbn, b.kbn);
    }

    #[test]
    fn data_cell_is_marked_unwritten_on_allocation() {
        let (mut usp, mut am) = fresh_pair();
        let outcome = allocate(Vtype::Data, &mut usp, &mut am).unwrap();
        assert_eq!(outcome.nkb, CELLS_PER_BK, "a data segment spans a whole block");
        let bkref = am.bkref(outcome.bkref_slot);
        assert!(bkref.boctets.iter().all(|bo| bo.is_unwritten()));
    }

    #[test]
    fn data_allocation_claims_an_entire_bkref() {
        let (mut usp, mut am) = fresh_pair();
        let outcome = allocate(Vtype::Data, &mut usp, &mut am).unwrap();
        assert_eq!(outcome.kbn, 0);
        {
            let bkref = am.bkref(outcome.bkref_slot);
            assert!(bkref.boctets.iter().all(|bo| bo.usemask == 0xFF));
        }
        let second = allocate(Vtype::Data, &mut usp, &mut am).unwrap();
        assert_ne!(
            outcome.bkref_slot, second.bkref_slot,
            "a second data segment must land in its own bkref"
        );

        deallocate(outcome, Vtype::Data, &mut usp, &mut am).unwrap();
        assert!(am.bkref(outcome.bkref_slot).is_empty());
    }

    #[test]
    fn exhausting_every_ag_record_reports_no_space() {
        let mut usp = UspaceMap::new_formatted();
        // No AG record is ever marked formatted: every allocate fails.
        let mut am = AgroupMap::new_formatted();
        assert!(matches!(allocate(Vtype::Inode, &mut usp, &mut am), Err(Error::NoSpace)));
    }
}
