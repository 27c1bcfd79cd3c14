//! Extended attribute operations (spec.md §12, grounded on
//! `original_source/attic/voluta/lib/xattr.c`): a single `XattrNode` per
//! inode, created lazily on first `setxattr`.

use storage::cache::VnodeEntry;
use storage::dispatcher::Dispatcher;
use storage::types::xattrnode::XattrNode;

use crate::error::{Error, Result};

fn load(d: &mut Dispatcher, ino: u64) -> Result<Option<XattrNode>> {
    let Some(vaddr) = d.stage_inode(ino)?.xattr_root else { return Ok(None) };
    match d.stage_vnode(vaddr)?.clone() {
        VnodeEntry::Xattr(n) => Ok(Some(n)),
        _ => Err(Error::Storage(storage::Error::corrupted("xattr vaddr is not an xattr node"))),
    }
}

pub fn get(d: &mut Dispatcher, ino: u64, name: &[u8]) -> Result<Vec<u8>> {
    load(d, ino)?.and_then(|n| n.get(name).map(|v| v.to_vec())).ok_or(Error::NotFound)
}

pub fn list(d: &mut Dispatcher, ino: u64) -> Result<Vec<Vec<u8>>> {
    Ok(load(d, ino)?.map(|n| n.entries.iter().map(|e| e.name.clone()).collect()).unwrap_or_default())
}

pub fn set(d: &mut Dispatcher, ino: u64, name: Vec<u8>, value: Vec<u8>) -> Result<()> {
    let root_vaddr = match d.stage_inode(ino)?.xattr_root {
        Some(v) => v,
        None => {
            let v = d.new_vnode(VnodeEntry::Xattr(XattrNode::new()))?;
            let inode = d.stage_inode_mut(ino)?;
            inode.xattr_root = Some(v);
            d.flush_inode(ino)?;
            v
        }
    };
    let mut node = match d.stage_vnode(root_vaddr)?.clone() {
        VnodeEntry::Xattr(n) => n,
        _ => return Err(Error::Storage(storage::Error::corrupted("xattr vaddr is not an xattr node"))),
    };
    node.insert(name, value).map_err(|_| Error::Storage(storage::Error::NoSpace))?;
    *d.stage_vnode_mut(root_vaddr)? = VnodeEntry::Xattr(node);
    d.flush_vnode(root_vaddr)?;
    Ok(())
}

pub fn remove(d: &mut Dispatcher, ino: u64, name: &[u8]) -> Result<()> {
    let Some(root_vaddr) = d.stage_inode(ino)?.xattr_root else { return Err(Error::NotFound) };
    let mut node = match d.stage_vnode(root_vaddr)?.clone() {
        VnodeEntry::Xattr(n) => n,
        _ => return Err(Error::Storage(storage::Error::corrupted("xattr vaddr is not an xattr node"))),
    };
    if !node.remove(name) {
        return Err(Error::NotFound);
    }
    *d.stage_vnode_mut(root_vaddr)? = VnodeEntry::Xattr(node);
    d.flush_vnode(root_vaddr)?;
    Ok(())
}

pub fn free_all(d: &mut Dispatcher, ino: u64) -> Result<()> {
    if let Some(vaddr) = d.stage_inode(ino)?.xattr_root {
        d.del_vnode(vaddr)?;
    }
    Ok(())
}
