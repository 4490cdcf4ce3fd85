//! Page table entries.
//!
//! A page table maps virtual page numbers to entries. Only the bits the
//! core reasons about are modelled: present, writable, user, and the
//! software copy-on-write tag.

use hashbrown::HashMap;

use super::{PhysAddr, VirtAddr};

bitflags::bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        /// Page is present.
        const PRESENT = 1 << 0;
        /// Page is writable.
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode.
        const USER = 1 << 2;
        /// Shared read-only until the next write copies it.
        const COW = 1 << 9;
    }
}

/// One page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub frame: PhysAddr,
    pub flags: PteFlags,
}

impl Pte {
    pub const EMPTY: Pte = Pte {
        frame: PhysAddr(0),
        flags: PteFlags::empty(),
    };

    pub fn new(frame: PhysAddr, flags: PteFlags) -> Self {
        Self {
            frame,
            flags: flags | PteFlags::PRESENT,
        }
    }

    pub fn is_present(&self) -> bool {
        self.flags.contains(PteFlags::PRESENT)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::WRITABLE)
    }

    pub fn is_cow(&self) -> bool {
        self.flags.contains(PteFlags::COW)
    }
}

/// Page table of one address space.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: HashMap<usize, Pte>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, va: VirtAddr) -> Option<&Pte> {
        self.entries.get(&va.vpn())
    }

    pub fn get_mut(&mut self, va: VirtAddr) -> Option<&mut Pte> {
        self.entries.get_mut(&va.vpn())
    }

    /// The entry slot for `va`, created empty if missing.
    pub fn entry(&mut self, va: VirtAddr) -> &mut Pte {
        self.entries.entry(va.vpn()).or_insert(Pte::EMPTY)
    }

    pub fn remove(&mut self, va: VirtAddr) -> Option<Pte> {
        self.entries.remove(&va.vpn())
    }

    /// Present entries, in no particular order.
    pub fn present(&self) -> impl Iterator<Item = (VirtAddr, Pte)> + '_ {
        self.entries
            .iter()
            .filter(|(_, pte)| pte.is_present())
            .map(|(vpn, pte)| (VirtAddr::from_vpn(*vpn), *pte))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (VirtAddr, Pte)> + '_ {
        self.entries
            .drain()
            .map(|(vpn, pte)| (VirtAddr::from_vpn(vpn), pte))
    }
}
