//! Regular-file data operations (spec.md §12, grounded on
//! `original_source/attic/voluta/lib/file.c`): reads and writes go
//! through a file's radix-node slots down to `Vtype::Data` cells.
//!
//! The radix tree grows on demand, one level at a time, up to
//! `MAX_DEPTH`: a fresh file starts as a single leaf node (`depth == 0`,
//! `FANOUT` slots pointing straight at whole-block data segments) and
//! only gains inner levels (slots pointing at child radix nodes) once a
//! write's end offset outgrows the current depth's capacity. The
//! in-memory/on-disk height lives in `Inode::file_tree_height`.

use storage::cache::VnodeEntry;
use storage::dispatcher::Dispatcher;
use storage::geometry::{Vaddr, BK_SIZE, KB};
use storage::types::filenode::{FileRadixNode, FANOUT};
use storage::types::inode::InodeKind;
use storage::util::ceil_division;
use storage::vtype::Vtype;

use crate::error::{Error, Result};

/// Deepest a file radix tree is allowed to grow. `capacity_at_depth(3)`
/// is about 6 TiB, comfortably past any offset this filesystem's other
/// limits would let a caller reach.
const MAX_DEPTH: u8 = 3;

/// Bytes addressable by a subtree rooted at a node of this depth: a leaf
/// (`depth == 0`) holds `FANOUT` whole data segments; each level above
/// multiplies that by `FANOUT` again.
fn capacity_at_depth(depth: u8) -> u64 {
    let mut cap = BK_SIZE;
    for _ in 0..=depth {
        cap *= FANOUT as u64;
    }
    cap
}

fn max_file_size() -> u64 {
    capacity_at_depth(MAX_DEPTH)
}

/// Bytes addressable by one slot of a node at `depth`.
fn child_capacity(depth: u8) -> u64 {
    if depth == 0 {
        BK_SIZE
    } else {
        capacity_at_depth(depth - 1)
    }
}

/// Shallowest depth whose capacity reaches `end`, capped at `MAX_DEPTH`.
fn depth_needed_for(end: u64) -> u8 {
    let mut depth = 0u8;
    while depth < MAX_DEPTH && end > capacity_at_depth(depth) {
        depth += 1;
    }
    depth
}

/// A leaf slot's packed offset is a data segment's `Vaddr::off()`; data
/// segments are whole-block (spec.md §3 item 9), so `kbn` is always 0.
fn data_vaddr_from_off(off: u64) -> Vaddr {
    debug_assert_eq!(off % BK_SIZE, 0, "a data segment offset is block-aligned");
    Vaddr::new(Vtype::Data, off / BK_SIZE, 0)
}

/// An inner slot's packed offset is a child radix node's `Vaddr::off()`;
/// radix nodes stay KB-sized metadata objects, packed the same way every
/// other sub-block vtype is.
fn node_vaddr_from_off(off: u64) -> Vaddr {
    let lba = off / BK_SIZE;
    let kbn = ((off % BK_SIZE) / KB) as u8;
    Vaddr::new(Vtype::FileRadixNode, lba, kbn)
}

fn require_regular(d: &mut Dispatcher, ino: u64) -> Result<()> {
    if d.stage_inode(ino)?.kind != InodeKind::Regular {
        return Err(Error::IsDirectory);
    }
    Ok(())
}

fn load_node(d: &mut Dispatcher, vaddr: Vaddr) -> Result<FileRadixNode> {
    match d.stage_vnode(vaddr)?.clone() {
        VnodeEntry::FileRadix(n) => Ok(n),
        _ => Err(Error::Storage(storage::Error::corrupted("radix node is not a file node"))),
    }
}

/// Fills `buf` from the subtree rooted at `root` (or zeros, for a hole),
/// `buf[0]` corresponding to `offset` within that subtree.
fn read_at(d: &mut Dispatcher, root: Option<Vaddr>, depth: u8, offset: u64, buf: &mut [u8]) -> Result<()> {
    let Some(root_vaddr) = root else {
        buf.fill(0);
        return Ok(());
    };
    let node = load_node(d, root_vaddr)?;
    let child_cap = child_capacity(depth);

    let mut done = 0usize;
    while done < buf.len() {
        let pos = offset + done as u64;
        let idx = (pos / child_cap) as usize;
        let local = pos % child_cap;
        debug_assert!(idx < FANOUT, "offset exceeds this subtree's capacity");
        let take = (child_cap - local).min((buf.len() - done) as u64) as usize;

        let slot = node.slots[idx];
        if depth == 0 {
            if slot.is_null() {
                buf[done..done + take].fill(0);
            } else {
                let vaddr = data_vaddr_from_off(slot.get());
                let cell = d.read_data(&vaddr)?;
                let local = local as usize;
                buf[done..done + take].copy_from_slice(&cell[local..local + take]);
            }
        } else {
            let child = if slot.is_null() { None } else { Some(node_vaddr_from_off(slot.get())) };
            read_at(d, child, depth - 1, local, &mut buf[done..done + take])?;
        }
        done += take;
    }
    Ok(())
}

/// Writes `data` into the subtree rooted at `node_vaddr` (which must
/// already exist), lazily allocating data segments/child nodes as
/// needed, then re-stages and flushes `node_vaddr` with the result.
fn write_at(d: &mut Dispatcher, node_vaddr: Vaddr, depth: u8, offset: u64, data: &[u8]) -> Result<()> {
    let mut node = load_node(d, node_vaddr)?;
    let child_cap = child_capacity(depth);

    let mut done = 0usize;
    while done < data.len() {
        let pos = offset + done as u64;
        let idx = (pos / child_cap) as usize;
        let local = pos % child_cap;
        debug_assert!(idx < FANOUT, "offset exceeds this subtree's capacity");
        let take = (child_cap - local).min((data.len() - done) as u64) as usize;

        if depth == 0 {
            let slot = node.slots[idx];
            let vaddr = if slot.is_null() {
                let v = d.new_vspace(Vtype::Data)?;
                node.slots[idx].set(v.off());
                v
            } else {
                data_vaddr_from_off(slot.get())
            };
            let mut cell = if local == 0 && take == BK_SIZE as usize {
                vec![0u8; BK_SIZE as usize]
            } else {
                d.read_data(&vaddr)?
            };
            let local = local as usize;
            cell[local..local + take].copy_from_slice(&data[done..done + take]);
            d.write_data(&vaddr, &cell);
        } else {
            let slot = node.slots[idx];
            let child_vaddr = if slot.is_null() {
                let v = d.new_vnode(VnodeEntry::FileRadix(FileRadixNode::new(depth - 1)))?;
                node.slots[idx].set(v.off());
                v
            } else {
                node_vaddr_from_off(slot.get())
            };
            write_at(d, child_vaddr, depth - 1, local, &data[done..done + take])?;
        }
        done += take;
    }

    *d.stage_vnode_mut(node_vaddr)? = VnodeEntry::FileRadix(node);
    d.flush_vnode(node_vaddr)
}

/// Recursively frees every data segment and child node under `vaddr`,
/// then `vaddr` itself.
fn free_subtree(d: &mut Dispatcher, vaddr: Vaddr, depth: u8) -> Result<()> {
    let node = load_node(d, vaddr)?;
    for slot in node.slots.iter() {
        if slot.is_null() {
            continue;
        }
        if depth == 0 {
            d.del_vnode(data_vaddr_from_off(slot.get()))?;
        } else {
            free_subtree(d, node_vaddr_from_off(slot.get()), depth - 1)?;
        }
    }
    d.del_vnode(vaddr)
}

/// Drops whatever in the subtree rooted at `node_vaddr` falls at or past
/// `new_size`, zero-pads the one child straddling the cut, and leaves
/// everything below it untouched.
fn truncate_at(d: &mut Dispatcher, node_vaddr: Vaddr, depth: u8, base: u64, new_size: u64) -> Result<()> {
    let mut node = load_node(d, node_vaddr)?;
    let child_cap = child_capacity(depth);

    for idx in 0..FANOUT {
        let slot = node.slots[idx];
        if slot.is_null() {
            continue;
        }
        let child_start = base + idx as u64 * child_cap;
        if child_start >= new_size {
            if depth == 0 {
                d.del_vnode(data_vaddr_from_off(slot.get()))?;
            } else {
                free_subtree(d, node_vaddr_from_off(slot.get()), depth - 1)?;
            }
            node.slots[idx] = Default::default();
        } else if child_start + child_cap > new_size {
            if depth == 0 {
                let vaddr = data_vaddr_from_off(slot.get());
                let mut bytes = d.read_data(&vaddr)?;
                let keep = (new_size - child_start) as usize;
                bytes[keep..].fill(0);
                d.write_data(&vaddr, &bytes);
            } else {
                truncate_at(d, node_vaddr_from_off(slot.get()), depth - 1, child_start, new_size)?;
            }
        }
    }

    *d.stage_vnode_mut(node_vaddr)? = VnodeEntry::FileRadix(node);
    d.flush_vnode(node_vaddr)
}

/// Reads up to `buf.len()` bytes starting at `offset`, returning the
/// number of bytes actually filled (short past EOF, like `pread`).
pub fn read(d: &mut Dispatcher, ino: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
    require_regular(d, ino)?;
    let inode = d.stage_inode(ino)?;
    let size = inode.size;
    let root = inode.file_radix_root;
    let height = inode.file_tree_height as u8;
    if offset >= size || buf.is_empty() {
        return Ok(0);
    }
    let want = buf.len().min((size - offset) as usize);
    read_at(d, root, height, offset, &mut buf[..want])?;
    Ok(want)
}

/// Writes `data` at `offset`, growing the file (and its radix tree, one
/// level at a time, up to `MAX_DEPTH`) as needed, and returns the number
/// of bytes written.
pub fn write(d: &mut Dispatcher, ino: u64, offset: u64, data: &[u8]) -> Result<usize> {
    require_regular(d, ino)?;
    if data.is_empty() {
        return Ok(0);
    }
    let end = offset
        .checked_add(data.len() as u64)
        .ok_or_else(|| Error::InvalidArgument("write overflows u64".into()))?;
    let cap = max_file_size();
    if end > cap {
        return Err(Error::InvalidArgument(format!("write exceeds the {cap}-byte file cap")));
    }

    let (mut root, mut height) = {
        let inode = d.stage_inode(ino)?;
        (inode.file_radix_root, inode.file_tree_height as u8)
    };
    let needed_depth = depth_needed_for(end).max(height);

    let root_vaddr = match root {
        None => {
            let v = d.new_vnode(VnodeEntry::FileRadix(FileRadixNode::new(needed_depth)))?;
            height = needed_depth;
            v
        }
        Some(mut cur) => {
            while height < needed_depth {
                let new_depth = height + 1;
                let mut parent = FileRadixNode::new(new_depth);
                parent.slots[0].set(cur.off());
                cur = d.new_vnode(VnodeEntry::FileRadix(parent))?;
                height = new_depth;
            }
            cur
        }
    };
    root = Some(root_vaddr);

    write_at(d, root_vaddr, height, offset, data)?;

    let inode = d.stage_inode_mut(ino)?;
    inode.file_radix_root = root;
    inode.file_tree_height = height as u32;
    if end > inode.size {
        inode.size = end;
        inode.blocks = ceil_division(end, KB);
    }
    inode.mtime = storage::util::get_timestamp().as_secs();
    d.flush_inode(ino)?;
    d.maybe_commit_dirtyq()?;
    Ok(data.len())
}

/// Shrinks or grows a file to exactly `new_size` (spec.md §12
/// `setattr` driving `ftruncate`). Growing beyond the current size
/// leaves a hole — no cells are allocated for it, matching POSIX
/// sparse-truncate semantics.
pub fn truncate(d: &mut Dispatcher, ino: u64, new_size: u64) -> Result<()> {
    require_regular(d, ino)?;
    let cap = max_file_size();
    if new_size > cap {
        return Err(Error::InvalidArgument(format!("truncate exceeds the {cap}-byte file cap")));
    }
    let (old_size, root, height) = {
        let inode = d.stage_inode(ino)?;
        (inode.size, inode.file_radix_root, inode.file_tree_height as u8)
    };
    if let Some(root_vaddr) = root {
        if new_size < old_size {
            truncate_at(d, root_vaddr, height, 0, new_size)?;
        }
    }
    let inode = d.stage_inode_mut(ino)?;
    inode.size = new_size;
    inode.blocks = ceil_division(new_size, KB);
    d.flush_inode(ino)?;
    d.maybe_commit_dirtyq()?;
    Ok(())
}

/// Frees every data segment and radix node under the file (spec.md §12
/// `unlink` dropping the last link — grounded on
/// `original_source/attic/voluta/lib/namei.c`'s `drop_unlinked`).
pub fn free_all_data(d: &mut Dispatcher, ino: u64) -> Result<()> {
    let inode = d.stage_inode(ino)?;
    let root = inode.file_radix_root;
    let height = inode.file_tree_height as u8;
    let Some(root_vaddr) = root else { return Ok(()) };
    free_subtree(d, root_vaddr, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacities_grow_by_fanout_per_level() {
        assert_eq!(capacity_at_depth(0), FANOUT as u64 * BK_SIZE);
        assert_eq!(capacity_at_depth(1), FANOUT as u64 * capacity_at_depth(0));
        assert!(max_file_size() > 1u64 << 40, "must comfortably cover a 1 TiB offset");
    }

    #[test]
    fn depth_needed_for_stays_within_max_depth() {
        assert_eq!(depth_needed_for(1), 0);
        assert_eq!(depth_needed_for(capacity_at_depth(0) + 1), 1);
        assert_eq!(depth_needed_for(u64::MAX.min(max_file_size())), MAX_DEPTH);
    }
}
