//! [C2] Persistent store: wraps the backing file or block device
//! (spec.md §4.2).
//!
//! Grounded on the teacher's `utils/src/disk.rs` (raw `libc::ioctl` for
//! `BLKGETSIZE64`, `File` opened directly) and `mkfs/src/ext2.rs` (seek +
//! `read_exact`/`write_all` against a `std::fs::File`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::geometry::{PHYS_AG_SIZE, VOLUME_SIZE_MAX, VOLUME_SIZE_MIN};

/// Wraps the backing file/block device with bounded, flock-guarded I/O.
pub struct PersistentStore {
    file: File,
    size: u64,
}

fn device_size(path: &Path, file: &File) -> Result<u64> {
    let meta = file.metadata()?;
    let ft = meta.file_type();
    if ft.is_block_device() {
        let mut sectors: u64 = 0;
        let ret = unsafe {
            libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut sectors as *mut u64)
        };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(sectors)
    } else {
        let _ = path;
        Ok(meta.len())
    }
}

// `_IOR(0x12, 114, size_t)` — see teacher's `ior!` macro in `utils/src/disk.rs`.
const BLKGETSIZE64: libc::c_ulong = (2u64 << 30) | (0x12u64 << 8) | 114u64 | (8u64 << 16);

impl PersistentStore {
    /// Opens `path` `O_RDWR`, verifies size is a multiple of the AG size
    /// and within `[size_min, size_max]`, and acquires an advisory
    /// whole-file write lock held for the lifetime of the mount.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = device_size(path, &file)?;
        if size % PHYS_AG_SIZE != 0 {
            return Err(Error::invalid(format!(
                "volume size {} is not a multiple of the AG size {}",
                size, PHYS_AG_SIZE
            )));
        }
        if !(VOLUME_SIZE_MIN..=VOLUME_SIZE_MAX).contains(&size) {
            return Err(Error::invalid(format!(
                "volume size {} out of bounds [{}, {}]",
                size, VOLUME_SIZE_MIN, VOLUME_SIZE_MAX
            )));
        }
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(PersistentStore { file, size })
    }

    /// Creates (or truncates) `path` to `size` bytes and opens it the
    /// same way `open` does. Used by `mkfs`.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        if size % PHYS_AG_SIZE != 0 {
            return Err(Error::invalid("size must be a multiple of the AG size"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(PersistentStore { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn check_bounds(&self, off: u64, len: usize) -> Result<()> {
        if off.checked_add(len as u64).map_or(true, |end| end > self.size) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "I/O out of volume bounds",
            )));
        }
        Ok(())
    }

    pub fn read(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(off, buf.len())?;
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write(&mut self, off: u64, buf: &[u8]) -> Result<()> {
        self.check_bounds(off, buf.len())?;
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn sync(&mut self, datasync: bool) -> Result<()> {
        if datasync {
            self.file.sync_data()?;
        } else {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            log::warn!("persistent store: flush on drop failed: {e}");
        }
    }
}
