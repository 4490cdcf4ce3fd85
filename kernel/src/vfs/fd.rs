//! Open files.
//!
//! An open file is shared by reference: `dup` is `Arc::clone`, `close` is
//! dropping the `Arc`. Descriptor tables live in each process.

use alloc::sync::Arc;

use super::inode::Inode;

#[derive(Debug)]
pub struct File {
    ip: Arc<Inode>,
    readable: bool,
    writable: bool,
}

impl File {
    pub fn new(ip: Arc<Inode>, readable: bool, writable: bool) -> Self {
        Self {
            ip,
            readable,
            writable,
        }
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.ip
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }
}

/// `filedup`
pub fn dup(f: &Arc<File>) -> Arc<File> {
    Arc::clone(f)
}

/// `fileclose`
pub fn close(f: Arc<File>) {
    log::trace!("close {:?} (refs {})", f.ip, Arc::strong_count(&f));
    drop(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_dup_shares_object() {
        let f = Arc::new(File::new(Arc::new(Inode::new(2, Vec::new())), true, false));
        let g = dup(&f);
        assert!(Arc::ptr_eq(&f, &g));
        close(g);
        assert_eq!(Arc::strong_count(&f), 1);
    }
}
