//! Inodes.

use alloc::vec::Vec;

use crate::config::MAX_FILE_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::sync::{SpinLock, SpinLockGuard};

/// An in-memory inode. File content is reached through [`Inode::lock`].
pub struct Inode {
    inum: u32,
    data: SpinLock<InodeData>,
}

/// Content of a locked inode.
pub struct InodeData {
    bytes: Vec<u8>,
}

impl Inode {
    pub fn new(inum: u32, bytes: Vec<u8>) -> Self {
        Self {
            inum,
            data: SpinLock::new("inode", InodeData { bytes }),
        }
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    /// `ilock`: lock the inode; dropping the guard is `iunlock`.
    pub fn lock(&self) -> SpinLockGuard<'_, InodeData> {
        self.data.lock()
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Inode({})", self.inum)
    }
}

impl InodeData {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read up to `buf.len()` bytes at `off`; returns the count read.
    /// Reading at or past the end returns 0.
    pub fn read_at(&self, buf: &mut [u8], off: usize) -> usize {
        if off >= self.bytes.len() {
            return 0;
        }
        let n = buf.len().min(self.bytes.len() - off);
        buf[..n].copy_from_slice(&self.bytes[off..off + n]);
        n
    }

    /// Write `data` at `off`, growing the file (zero-filled) as needed.
    pub fn write_at(&mut self, data: &[u8], off: usize) -> KernelResult<usize> {
        let end = off
            .checked_add(data.len())
            .ok_or(KernelError::FileTooLarge)?;
        if end > MAX_FILE_SIZE {
            return Err(KernelError::FileTooLarge);
        }
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[off..end].copy_from_slice(data);
        Ok(data.len())
    }

    pub fn replace(&mut self, data: &[u8]) -> KernelResult<()> {
        if data.len() > MAX_FILE_SIZE {
            return Err(KernelError::FileTooLarge);
        }
        self.bytes.clear();
        self.bytes.extend_from_slice(data);
        Ok(())
    }
}
