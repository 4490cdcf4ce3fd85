//! Kernel configuration constants.
//!
//! This module contains compile-time configuration for the kernel core.
//! Values here affect memory layout and table limits. Runtime knobs that
//! tests want to vary (CPU count, physical memory size) live in
//! [`KernelConfig`].

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of process table slots.
pub const NPROC: usize = 64;

/// Maximum number of CPUs supported.
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Maximum number of live mapping records per process.
pub const MAX_MAPPINGS: usize = 32;

/// First address of the mmap window.
pub const MMAP_AREA_START: usize = 0x6000_0000;

/// End (exclusive) of the mmap window.
pub const MMAP_AREA_END: usize = 0x8000_0000;

/// Process names are truncated to this many bytes.
pub const PROC_NAME_LEN: usize = 16;

/// Largest file the in-memory file system will grow to.
pub const MAX_FILE_SIZE: usize = 1024 * 1024;

/// Default number of physical frames (4 MB of simulated RAM).
pub const DEFAULT_PHYS_PAGES: usize = 1024;

/// Runtime configuration handed to [`crate::Kernel::boot`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of CPUs (scheduler loops).
    pub ncpu: usize,
    /// Number of process table slots.
    pub nproc: usize,
    /// Physical frames available to the page allocator.
    pub phys_pages: usize,
}

impl KernelConfig {
    pub fn with_cpus(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu.clamp(1, NCPU);
        self
    }

    pub fn with_procs(mut self, nproc: usize) -> Self {
        self.nproc = nproc.clamp(1, NPROC);
        self
    }

    pub fn with_phys_pages(mut self, pages: usize) -> Self {
        self.phys_pages = pages;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ncpu: 1,
            nproc: NPROC,
            phys_pages: DEFAULT_PHYS_PAGES,
        }
    }
}
