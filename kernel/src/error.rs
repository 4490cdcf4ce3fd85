//! Kernel error type.
//!
//! Every recoverable failure inside the core is a [`KernelError`]. The
//! system-call layer collapses all of them into the single `-1` sentinel;
//! the variants exist so the core can log and test *why* a call failed.
//! Invariant violations are not errors: they panic.

/// Recoverable kernel failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No UNUSED slot in the process table.
    NoFreeProc,
    /// The physical page pool is exhausted.
    OutOfMemory,
    /// No gap in the mmap window (or the mapping list is full).
    NoAddressSpace,
    /// A system call argument was rejected.
    InvalidArgument(&'static str),
    /// The descriptor does not name an open file.
    BadFileDescriptor,
    /// `wait` found nothing to wait for.
    NoChildren,
    /// No live process has the requested pid.
    NoSuchProcess,
    /// The caller was killed while blocked.
    Killed,
    /// Fault address not covered by a mapping or a COW page.
    SegmentationFault,
    /// A page-table entry was already present.
    AlreadyMapped,
    /// Write past the file size limit.
    FileTooLarge,
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::NoFreeProc => write!(f, "process table full"),
            KernelError::OutOfMemory => write!(f, "out of physical memory"),
            KernelError::NoAddressSpace => write!(f, "no free range in mmap window"),
            KernelError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            KernelError::BadFileDescriptor => write!(f, "bad file descriptor"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::NoSuchProcess => write!(f, "no such process"),
            KernelError::Killed => write!(f, "killed"),
            KernelError::SegmentationFault => write!(f, "segmentation fault"),
            KernelError::AlreadyMapped => write!(f, "page already mapped"),
            KernelError::FileTooLarge => write!(f, "file too large"),
        }
    }
}

/// Result alias used throughout the core.
pub type KernelResult<T> = Result<T, KernelError>;
