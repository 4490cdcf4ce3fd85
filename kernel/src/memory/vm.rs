//! Address spaces.
//!
//! Page tables live in an arena and are named by [`VmId`] handles. The
//! process core never touches an entry directly; it goes through the
//! operations here (create, copy, grow, shrink, free, translate, map,
//! switch, flush).

use alloc::sync::Arc;
use hashbrown::HashMap;

use super::frame::FramePool;
use super::page_table::{PageTable, Pte, PteFlags};
use super::{pg_round_up, PhysAddr, VirtAddr};
use crate::config::{MMAP_AREA_START, PAGE_SIZE};
use crate::cpu::Cpu;
use crate::error::{KernelError, KernelResult};
use crate::sync::SpinLock;

/// Handle to an address space in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmId(pub usize);

impl core::fmt::Display for VmId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "vm{}", self.0)
    }
}

struct Space {
    /// Frame standing in for the page directory.
    pgdir: PhysAddr,
    table: PageTable,
    tlb_flushes: u64,
}

struct Arena {
    spaces: HashMap<usize, Space>,
    next_id: usize,
}

impl Arena {
    fn space(&mut self, vm: VmId) -> &mut Space {
        match self.spaces.get_mut(&vm.0) {
            Some(space) => space,
            None => panic!("vm: bad address space {}", vm),
        }
    }
}

pub struct AddressSpaces {
    arena: SpinLock<Arena>,
    frames: Arc<FramePool>,
}

impl AddressSpaces {
    pub fn new(frames: Arc<FramePool>) -> Self {
        Self {
            arena: SpinLock::new(
                "vm",
                Arena {
                    spaces: HashMap::new(),
                    next_id: 1,
                },
            ),
            frames,
        }
    }

    /// Create an empty user address space.
    pub fn create(&self) -> KernelResult<VmId> {
        let pgdir = self.frames.alloc().ok_or(KernelError::OutOfMemory)?;
        self.frames.fill(pgdir, 0);
        let mut arena = self.arena.lock();
        let id = arena.next_id;
        arena.next_id += 1;
        arena.spaces.insert(
            id,
            Space {
                pgdir,
                table: PageTable::new(),
                tlb_flushes: 0,
            },
        );
        Ok(VmId(id))
    }

    /// Load the initial program image at address 0. `image` must fit in a page.
    pub fn init_image(&self, vm: VmId, image: &[u8]) -> KernelResult<()> {
        if image.len() > PAGE_SIZE {
            panic!("init_image: more than a page");
        }
        let pa = self.frames.alloc().ok_or(KernelError::OutOfMemory)?;
        self.frames.fill(pa, 0);
        self.frames.write(pa, 0, image);
        self.map_pages(
            vm,
            VirtAddr::new(0),
            PAGE_SIZE,
            pa,
            PteFlags::WRITABLE | PteFlags::USER,
        )
        .inspect_err(|_| self.frames.free(pa))
    }

    /// Deep copy of `[0, size)` of `src` into a new address space.
    pub fn copy(&self, src: VmId, size: usize) -> KernelResult<VmId> {
        let dst = self.create()?;
        let mut va = 0;
        while va < size {
            let pte = match self.translate(src, VirtAddr::new(va)) {
                Some(pte) if pte.is_present() => pte,
                _ => panic!("copyuvm: page not present"),
            };
            let copied = self.frames.alloc().ok_or(KernelError::OutOfMemory);
            let copied = match copied {
                Ok(pa) => pa,
                Err(e) => {
                    self.free(dst);
                    return Err(e);
                }
            };
            self.frames.copy_page(copied, pte.frame);
            let flags = pte.flags - PteFlags::PRESENT;
            if let Err(e) = self.map_pages(dst, VirtAddr::new(va), PAGE_SIZE, copied, flags) {
                self.frames.free(copied);
                self.free(dst);
                return Err(e);
            }
            va += PAGE_SIZE;
        }
        Ok(dst)
    }

    /// Grow the heap from `old_size` to `new_size` with zeroed pages.
    ///
    /// The heap may not reach into the mmap window. On failure everything
    /// allocated by this call is released again.
    pub fn grow(&self, vm: VmId, old_size: usize, new_size: usize) -> KernelResult<usize> {
        if new_size > MMAP_AREA_START {
            return Err(KernelError::OutOfMemory);
        }
        if new_size < old_size {
            return Ok(old_size);
        }
        let mut va = pg_round_up(old_size);
        while va < new_size {
            let pa = match self.frames.alloc() {
                Some(pa) => pa,
                None => {
                    self.shrink(vm, new_size, old_size);
                    return Err(KernelError::OutOfMemory);
                }
            };
            self.frames.fill(pa, 0);
            let flags = PteFlags::WRITABLE | PteFlags::USER;
            if let Err(e) = self.map_pages(vm, VirtAddr::new(va), PAGE_SIZE, pa, flags) {
                self.frames.free(pa);
                self.shrink(vm, new_size, old_size);
                return Err(e);
            }
            va += PAGE_SIZE;
        }
        Ok(new_size)
    }

    /// Release heap pages between `new_size` and `old_size`.
    pub fn shrink(&self, vm: VmId, old_size: usize, new_size: usize) -> usize {
        if new_size >= old_size {
            return old_size;
        }
        let start = pg_round_up(new_size);
        let end = pg_round_up(old_size);
        if end > start {
            self.unmap_pages(vm, VirtAddr::new(start), (end - start) / PAGE_SIZE);
        }
        new_size
    }

    /// Free every page of `vm` and the space itself.
    pub fn free(&self, vm: VmId) {
        let space = {
            let mut arena = self.arena.lock();
            match arena.spaces.remove(&vm.0) {
                Some(space) => space,
                None => panic!("freevm: no pgdir"),
            }
        };
        let mut table = space.table;
        for (_, pte) in table.drain() {
            if pte.is_present() {
                self.frames.free(pte.frame);
            }
        }
        self.frames.free(space.pgdir);
    }

    /// Run `f` on the entry slot for `va`.
    ///
    /// Returns `None` when the slot does not exist and `create` is false.
    pub fn with_entry<R>(
        &self,
        vm: VmId,
        va: VirtAddr,
        create: bool,
        f: impl FnOnce(&mut Pte) -> R,
    ) -> Option<R> {
        let mut arena = self.arena.lock();
        let table = &mut arena.space(vm).table;
        if create {
            Some(f(table.entry(va)))
        } else {
            table.get_mut(va).map(f)
        }
    }

    /// Copy of the entry for `va`, if one exists.
    pub fn translate(&self, vm: VmId, va: VirtAddr) -> Option<Pte> {
        self.with_entry(vm, va, false, |pte| *pte)
    }

    /// Map `len` bytes at `va` to consecutive frames starting at `pa`.
    ///
    /// Fails without changing anything if any page is already present.
    pub fn map_pages(
        &self,
        vm: VmId,
        va: VirtAddr,
        len: usize,
        pa: PhysAddr,
        perm: PteFlags,
    ) -> KernelResult<()> {
        let first = va.page_round_down();
        let npages = (pg_round_up(va.as_usize() + len) - first.as_usize()) / PAGE_SIZE;
        let mut arena = self.arena.lock();
        let table = &mut arena.space(vm).table;
        for i in 0..npages {
            if table
                .get(first + i * PAGE_SIZE)
                .is_some_and(|pte| pte.is_present())
            {
                return Err(KernelError::AlreadyMapped);
            }
        }
        for i in 0..npages {
            *table.entry(first + i * PAGE_SIZE) = Pte::new(PhysAddr(pa.0 + i * PAGE_SIZE), perm);
        }
        Ok(())
    }

    /// Remove `npages` entries starting at `va`, dropping a reference to
    /// every present frame.
    pub fn unmap_pages(&self, vm: VmId, va: VirtAddr, npages: usize) {
        let mut released = alloc::vec::Vec::new();
        {
            let mut arena = self.arena.lock();
            let space = arena.space(vm);
            for i in 0..npages {
                if let Some(pte) = space.table.remove(va + i * PAGE_SIZE) {
                    if pte.is_present() {
                        released.push(pte.frame);
                    }
                }
            }
            if !released.is_empty() {
                space.tlb_flushes += 1;
            }
        }
        for pa in released {
            self.frames.free(pa);
        }
    }

    /// Load `vm` (or the kernel-only mapping for `None`) on `cpu`.
    pub fn switch_to(&self, cpu: &Cpu, vm: Option<VmId>) {
        cpu.set_active_vm(vm);
    }

    /// Invalidate cached translations of `vm`.
    pub fn flush_tlb(&self, vm: VmId) {
        self.arena.lock().space(vm).tlb_flushes += 1;
    }

    pub fn tlb_flushes(&self, vm: VmId) -> u64 {
        self.arena.lock().space(vm).tlb_flushes
    }

    /// Number of present pages in `vm`.
    pub fn resident_pages(&self, vm: VmId) -> usize {
        self.arena.lock().space(vm).table.present().count()
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spaces(pages: usize) -> AddressSpaces {
        AddressSpaces::new(Arc::new(FramePool::new(pages)))
    }

    #[test]
    fn test_grow_and_shrink() {
        let vm = spaces(16);
        let id = vm.create().unwrap();
        assert_eq!(vm.grow(id, 0, 3 * PAGE_SIZE).unwrap(), 3 * PAGE_SIZE);
        assert_eq!(vm.resident_pages(id), 3);
        assert_eq!(vm.shrink(id, 3 * PAGE_SIZE, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(vm.resident_pages(id), 1);
        vm.free(id);
        assert_eq!(vm.frames().free_count(), 16);
    }

    #[test]
    fn test_grow_failure_releases_partial_work() {
        let vm = spaces(3);
        let id = vm.create().unwrap();
        assert_eq!(
            vm.grow(id, 0, 4 * PAGE_SIZE),
            Err(KernelError::OutOfMemory)
        );
        assert_eq!(vm.resident_pages(id), 0);
        assert_eq!(vm.frames().free_count(), 2);
    }

    #[test]
    fn test_grow_refuses_mmap_window() {
        let vm = spaces(4);
        let id = vm.create().unwrap();
        assert!(vm.grow(id, 0, MMAP_AREA_START + PAGE_SIZE).is_err());
    }

    #[test]
    fn test_copy_is_deep() {
        let vm = spaces(16);
        let src = vm.create().unwrap();
        vm.init_image(src, b"init").unwrap();
        let dst = vm.copy(src, PAGE_SIZE).unwrap();
        let a = vm.translate(src, VirtAddr::new(0)).unwrap();
        let b = vm.translate(dst, VirtAddr::new(0)).unwrap();
        assert_ne!(a.frame, b.frame);
        let mut buf = [0u8; 4];
        vm.frames().read(b.frame, 0, &mut buf);
        assert_eq!(&buf, b"init");
    }

    #[test]
    fn test_map_pages_rejects_remap() {
        let vm = spaces(8);
        let id = vm.create().unwrap();
        let pa = vm.frames().alloc().unwrap();
        let va = VirtAddr::new(MMAP_AREA_START);
        vm.map_pages(id, va, PAGE_SIZE, pa, PteFlags::USER).unwrap();
        assert_eq!(
            vm.map_pages(id, va, PAGE_SIZE, pa, PteFlags::USER),
            Err(KernelError::AlreadyMapped)
        );
    }

    #[test]
    fn test_with_entry_create() {
        let vm = spaces(4);
        let id = vm.create().unwrap();
        let va = VirtAddr::new(0x5000);
        assert!(vm.with_entry(id, va, false, |_| ()).is_none());
        assert_eq!(vm.with_entry(id, va, true, |pte| pte.is_present()), Some(false));
    }
}
