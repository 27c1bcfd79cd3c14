//! `fuser::Filesystem` bridge over [`ops::Operations`] (spec.md §6, §13).
//!
//! Every method here does the same three things: translate FUSE
//! arguments into an `ops::Operations` call, translate the result back
//! into a FUSE reply, and log nothing else — `ops` already owns all the
//! POSIX-shape error kinds, this layer just renders them as `errno`.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;

use ops::inode::{Attr, AttrChanges};
use ops::{Error, Operations};
use storage::types::inode::InodeKind;

/// How long the kernel may cache a lookup/attr reply before re-asking
/// (spec.md doesn't specify a TTL; one second matches the teacher's
/// lack-of-caching conservatism elsewhere in the pack).
const TTL: Duration = Duration::from_secs(1);

pub struct VolutaFs {
    ops: Operations,
}

impl VolutaFs {
    pub fn new(ops: Operations) -> Self {
        VolutaFs { ops }
    }
}

fn kind_to_filetype(kind: InodeKind) -> FileType {
    match kind {
        InodeKind::Directory => FileType::Directory,
        InodeKind::Regular => FileType::RegularFile,
        InodeKind::Symlink => FileType::Symlink,
        InodeKind::Other => FileType::RegularFile,
    }
}

fn attr_to_fileattr(attr: &Attr) -> FileAttr {
    let to_time = |secs: u64| SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: to_time(attr.atime),
        mtime: to_time(attr.mtime),
        ctime: to_time(attr.ctime),
        crtime: to_time(attr.btime),
        kind: kind_to_filetype(attr.kind),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: storage::geometry::KB as u32,
        flags: 0,
    }
}

fn time_or_now_to_secs(t: TimeOrNow) -> u64 {
    let st = match t {
        TimeOrNow::Now => SystemTime::now(),
        TimeOrNow::SpecificTime(st) => st,
    };
    st.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl Filesystem for VolutaFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.ops.lookup(parent, name.as_bytes()) {
            Ok(ino) => match self.ops.getattr(ino) {
                Ok(attr) => reply.entry(&TTL, &attr_to_fileattr(&attr), 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, _ino: u64, _nlookup: u64) {}

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.ops.getattr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr_to_fileattr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = AttrChanges {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(time_or_now_to_secs),
            mtime: mtime.map(time_or_now_to_secs),
        };
        match self.ops.setattr(ino, changes) {
            Ok(attr) => reply.attr(&TTL, &attr_to_fileattr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.ops.readlink(ino) {
            Ok(value) => reply.data(&value),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, _rdev: u32, reply: ReplyEntry) {
        match self.ops.mknod(parent, name.as_bytes(), mode, req.uid(), req.gid()) {
            Ok(ino) => match self.ops.getattr(ino) {
                Ok(attr) => reply.entry(&TTL, &attr_to_fileattr(&attr), 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        match self.ops.mkdir(parent, name.as_bytes(), mode, req.uid(), req.gid()) {
            Ok(ino) => match self.ops.getattr(ino) {
                Ok(attr) => reply.entry(&TTL, &attr_to_fileattr(&attr), 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.ops.unlink(parent, name.as_bytes()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.ops.rmdir(parent, name.as_bytes()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(&mut self, req: &Request<'_>, parent: u64, link_name: &OsStr, target: &std::path::Path, reply: ReplyEntry) {
        match self.ops.symlink(parent, link_name.as_bytes(), target.as_os_str().as_bytes(), req.uid(), req.gid()) {
            Ok(ino) => match self.ops.getattr(ino) {
                Ok(attr) => reply.entry(&TTL, &attr_to_fileattr(&attr), 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
        match self.ops.rename(parent, name.as_bytes(), newparent, newname.as_bytes()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(&mut self, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        match self.ops.link(ino, newparent, newname.as_bytes()) {
            Ok(attr) => reply.entry(&TTL, &attr_to_fileattr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        let mut buf = vec![0u8; size as usize];
        match self.ops.read(ino, offset.max(0) as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
        match self.ops.write(ino, offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.ops.fsync(datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let dents = match self.ops.readdir(ino) {
            Ok(d) => d,
            Err(e) => return reply.error(e.errno()),
        };
        let synthetic = [(ino, FileType::Directory, b".".to_vec()), (ino, FileType::Directory, b"..".to_vec())];
        let mut index = 0i64;
        for (dino, kind, name) in synthetic.into_iter() {
            index += 1;
            if index > offset && reply.add(dino, index, kind, OsStr::from_bytes(&name)) {
                return reply.ok();
            }
        }
        for dent in dents {
            index += 1;
            if index <= offset {
                continue;
            }
            let kind = match dent.dtype {
                ops::namei::DT_DIR => FileType::Directory,
                ops::namei::DT_LNK => FileType::Symlink,
                _ => FileType::RegularFile,
            };
            if reply.add(dent.ino, index, kind, OsStr::from_bytes(&dent.name)) {
                return reply.ok();
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.ops.fsync(datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.ops.statfs() {
            Ok(sfs) => {
                let total_blocks = sfs.total_uspaces * storage::geometry::AG_SIZE / sfs.block_size;
                reply.statfs(total_blocks, 0, 0, 0, 0, sfs.block_size as u32, 255, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, value: &[u8], _flags: i32, _position: u32, reply: ReplyEmpty) {
        match self.ops.setxattr(ino, name.as_bytes(), value) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        match self.ops.getxattr(ino, name.as_bytes()) {
            Ok(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if (size as usize) < value.len() {
                    reply.error(libc::ERANGE);
                } else {
                    reply.data(&value);
                }
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        match self.ops.listxattr(ino) {
            Ok(names) => {
                let mut buf = Vec::new();
                for n in &names {
                    buf.extend_from_slice(n);
                    buf.push(0);
                }
                if size == 0 {
                    reply.size(buf.len() as u32);
                } else if (size as usize) < buf.len() {
                    reply.error(libc::ERANGE);
                } else {
                    reply.data(&buf);
                }
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.ops.removexattr(ino, name.as_bytes()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        match self.ops.access(ino, req.uid(), mask as u32) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, _flags: i32, reply: ReplyCreate) {
        match self.ops.create(parent, name.as_bytes(), mode, req.uid(), req.gid()) {
            Ok(ino) => match self.ops.getattr(ino) {
                Ok(attr) => reply.created(&TTL, &attr_to_fileattr(&attr), 0, 0, 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fallocate(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, length: i64, _mode: i32, reply: ReplyEmpty) {
        let end = (offset.max(0) as u64).saturating_add(length.max(0) as u64);
        let current = match self.ops.getattr(ino) {
            Ok(attr) => attr.size,
            Err(e) => return reply.error(e.errno()),
        };
        if end <= current {
            return reply.ok();
        }
        match self.ops.setattr(ino, AttrChanges { size: Some(end), ..Default::default() }) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}

impl From<Error> for c_int {
    fn from(e: Error) -> Self {
        e.errno()
    }
}
