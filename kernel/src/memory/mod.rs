//! Memory management subsystem.
//!
//! # Components
//!
//! - **Addresses**: `VirtAddr` / `PhysAddr` newtypes, never mixed
//! - **Frame**: reference-counted physical page pool
//! - **Page table**: entries and their flag bits
//! - **Vm**: arena of per-process address spaces
//! - **Mmap**: per-process mapping records, placement and validation
//! - **Fault**: page-fault resolution (copy-on-write, demand paging)

pub mod fault;
pub mod frame;
pub mod mmap;
pub mod page_table;
pub mod vm;

use crate::config::PAGE_SIZE;

/// Round `n` up to a page boundary.
pub const fn pg_round_up(n: usize) -> usize {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Round `n` down to a page boundary.
pub const fn pg_round_down(n: usize) -> usize {
    n & !(PAGE_SIZE - 1)
}

/// A user virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn page_round_down(self) -> Self {
        Self(pg_round_down(self.0))
    }

    pub const fn page_round_up(self) -> Self {
        Self(pg_round_up(self.0))
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    pub const fn page_offset(self) -> usize {
        self.0 % PAGE_SIZE
    }

    /// Virtual page number, the key of a page-table entry.
    pub const fn vpn(self) -> usize {
        self.0 / PAGE_SIZE
    }

    pub const fn from_vpn(vpn: usize) -> Self {
        Self(vpn * PAGE_SIZE)
    }

    pub fn checked_add(self, n: usize) -> Option<Self> {
        self.0.checked_add(n).map(Self)
    }
}

impl core::ops::Add<usize> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, rhs: usize) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}

impl core::fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl core::fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A physical address inside the frame pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

impl core::fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl core::fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(pg_round_up(0), 0);
        assert_eq!(pg_round_up(1), PAGE_SIZE);
        assert_eq!(pg_round_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(pg_round_down(PAGE_SIZE + 7), PAGE_SIZE);
    }

    #[test]
    fn test_virt_addr_page_helpers() {
        let va = VirtAddr::new(0x6000_1234);
        assert_eq!(va.page_round_down(), VirtAddr::new(0x6000_1000));
        assert_eq!(va.page_round_up(), VirtAddr::new(0x6000_2000));
        assert_eq!(va.page_offset(), 0x234);
        assert!(!va.is_page_aligned());
        assert_eq!(VirtAddr::from_vpn(va.vpn()), va.page_round_down());
    }
}
