//! Symlink operations (spec.md §12, grounded on
//! `original_source/attic/voluta/lib/symlink.c`): values up to
//! `SYMLINK_INLINE_LEN` live in the inode; longer values spill into a
//! `SymlinkTailNode`.

use storage::cache::VnodeEntry;
use storage::dispatcher::Dispatcher;
use storage::types::inode::SYMLINK_INLINE_LEN;
use storage::types::symlinknode::{SymlinkTailNode, L_PART};

use crate::error::{Error, Result};

const MAX_SYMLINK_LEN: usize = SYMLINK_INLINE_LEN + L_PART;

pub fn set_value(d: &mut Dispatcher, ino: u64, value: &[u8]) -> Result<()> {
    if value.is_empty() || value.len() > MAX_SYMLINK_LEN {
        return Err(Error::InvalidArgument("symlink value too long".into()));
    }
    let (head, tail) = if value.len() <= SYMLINK_INLINE_LEN {
        (value, &value[value.len()..])
    } else {
        value.split_at(SYMLINK_INLINE_LEN)
    };

    let tail_vaddr = if tail.is_empty() {
        None
    } else {
        let node = SymlinkTailNode::new(ino, tail.to_vec());
        Some(d.new_vnode(VnodeEntry::SymlinkTail(node))?)
    };

    let inode = d.stage_inode_mut(ino)?;
    inode.symlink_inline_head = [0u8; SYMLINK_INLINE_LEN];
    inode.symlink_inline_head[..head.len()].copy_from_slice(head);
    inode.size = value.len() as u64;
    inode.symlink_tail = tail_vaddr;
    d.flush_inode(ino)?;
    Ok(())
}

pub fn read_value(d: &mut Dispatcher, ino: u64) -> Result<Vec<u8>> {
    let inode = d.stage_inode(ino)?;
    let size = inode.size as usize;
    let head = inode.symlink_inline_head;
    let tail_vaddr = inode.symlink_tail;

    let head_len = size.min(SYMLINK_INLINE_LEN);
    let mut out = head[..head_len].to_vec();
    if size > SYMLINK_INLINE_LEN {
        let tail_vaddr = tail_vaddr.ok_or_else(|| Error::Storage(storage::Error::corrupted("symlink missing tail node")))?;
        let node = match d.stage_vnode(tail_vaddr)?.clone() {
            VnodeEntry::SymlinkTail(n) => n,
            _ => return Err(Error::Storage(storage::Error::corrupted("symlink tail vaddr is not a tail node"))),
        };
        out.extend_from_slice(&node.value);
    }
    Ok(out)
}

pub fn free_tail(d: &mut Dispatcher, ino: u64) -> Result<()> {
    if let Some(vaddr) = d.stage_inode(ino)?.symlink_tail {
        d.del_vnode(vaddr)?;
    }
    Ok(())
}
