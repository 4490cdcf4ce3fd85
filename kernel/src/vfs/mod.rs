//! Virtual File System
//!
//! A flat, in-memory file system: named regular files backed by inodes,
//! open-file objects shared by reference between descriptor tables, and a
//! transaction log that brackets every operation that may modify
//! persistent state.

pub mod fd;
pub mod inode;
pub mod journal;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;

pub use fd::File;
pub use inode::{Inode, InodeData};
pub use journal::{FsLog, FsOp};

use crate::error::{KernelError, KernelResult};
use crate::sync::SpinLock;

/// File open flags (subset of POSIX O_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags(0);
    pub const WRONLY: OpenFlags = OpenFlags(1);
    pub const RDWR: OpenFlags = OpenFlags(2);
    pub const CREAT: OpenFlags = OpenFlags(0o100);

    pub fn readable(self) -> bool {
        self.0 & 3 != 1
    }
    pub fn writable(self) -> bool {
        self.0 & 3 != 0
    }
    pub fn create(self) -> bool {
        self.0 & 0o100 != 0
    }
}

impl core::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

struct Namespace {
    files: HashMap<String, Arc<Inode>>,
    next_inum: u32,
}

/// The mounted file system.
pub struct FileSystem {
    root: Arc<Inode>,
    names: SpinLock<Namespace>,
    log: FsLog,
}

impl FileSystem {
    /// Mount an empty file system. Runs once at boot.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Inode::new(1, Vec::new())),
            names: SpinLock::new(
                "fs",
                Namespace {
                    files: HashMap::new(),
                    next_inum: 2,
                },
            ),
            log: FsLog::new(),
        }
    }

    /// Root directory inode.
    pub fn root(&self) -> Arc<Inode> {
        self.root.clone()
    }

    pub fn log(&self) -> &FsLog {
        &self.log
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<Inode>> {
        self.names.lock().files.get(path).cloned()
    }

    /// Create (or truncate and refill) a file.
    pub fn create(&self, path: &str, contents: &[u8]) -> KernelResult<Arc<Inode>> {
        if path.is_empty() {
            return Err(KernelError::InvalidArgument("empty path"));
        }
        let _op = self.log.begin_op();
        if let Some(ip) = self.lookup(path) {
            ip.lock().replace(contents)?;
            return Ok(ip);
        }
        let mut ns = self.names.lock();
        let inum = ns.next_inum;
        ns.next_inum += 1;
        let ip = Arc::new(Inode::new(inum, contents.to_vec()));
        ns.files.insert(path.to_string(), ip.clone());
        Ok(ip)
    }

    /// Open `path` as a new open-file object.
    pub fn open(&self, path: &str, flags: OpenFlags) -> KernelResult<Arc<File>> {
        let ip = match self.lookup(path) {
            Some(ip) => ip,
            None if flags.create() => self.create(path, &[])?,
            None => return Err(KernelError::InvalidArgument("no such file")),
        };
        Ok(Arc::new(File::new(ip, flags.readable(), flags.writable())))
    }

    /// Whole contents of `path`.
    pub fn read_all(&self, path: &str) -> Option<Vec<u8>> {
        let ip = self.lookup(path)?;
        let data = ip.lock();
        Some(data.bytes().to_vec())
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags() {
        assert!(OpenFlags::RDONLY.readable());
        assert!(!OpenFlags::RDONLY.writable());
        assert!(!OpenFlags::WRONLY.readable());
        assert!(OpenFlags::RDWR.writable());
        assert!((OpenFlags::RDWR | OpenFlags::CREAT).create());
    }

    #[test]
    fn test_create_and_open() {
        let fs = FileSystem::new();
        fs.create("data", b"abc").unwrap();
        let f = fs.open("data", OpenFlags::RDWR).unwrap();
        assert!(f.readable() && f.writable());
        assert_eq!(fs.read_all("data").unwrap(), b"abc");
        assert!(fs.open("missing", OpenFlags::RDONLY).is_err());
        assert!(fs.open("new", OpenFlags::RDWR | OpenFlags::CREAT).is_ok());
        assert_eq!(fs.log().commits(), 2);
    }
}
