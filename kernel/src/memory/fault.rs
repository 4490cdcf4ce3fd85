//! Page fault resolution.
//!
//! Two kinds of fault are legitimate. A write to a copy-on-write page gets
//! a private copy of the page. An access inside (or, for GROWSUP, one page
//! past) a mapping record materializes the page: zero-filled for anonymous
//! mappings, read from the file otherwise. Anything else is a segmentation
//! fault for the caller to deal with.

use alloc::vec;

use super::mmap::{MapFlags, Mapping};
use super::page_table::PteFlags;
use super::vm::VmId;
use super::{PhysAddr, VirtAddr};
use crate::config::{MMAP_AREA_END, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::process::ProcData;
use crate::Kernel;

impl Kernel {
    /// Resolve a fault at `va` in the process in `slot`.
    ///
    /// Runs with the process's data lock held for the whole resolution, so
    /// the mapping list cannot change underneath it.
    pub fn handle_page_fault(&self, slot: usize, va: VirtAddr) -> KernelResult<()> {
        let mut data = self.pdata[slot].lock();
        let vm = data.vm.ok_or(KernelError::SegmentationFault)?;

        if self.resolve_cow(vm, va)? {
            return Ok(());
        }
        self.resolve_mapping(&mut data, vm, va)
    }

    /// Give the faulting process its own copy of a COW page.
    ///
    /// Returns `Ok(false)` if `va` is not a COW fault.
    fn resolve_cow(&self, vm: VmId, va: VirtAddr) -> KernelResult<bool> {
        let page = va.page_round_down();
        let pte = match self.vm.translate(vm, page) {
            Some(pte) if pte.is_present() && pte.is_cow() && !pte.is_writable() => pte,
            _ => return Ok(false),
        };
        let copy = self.frames.alloc().ok_or(KernelError::OutOfMemory)?;
        self.frames.copy_page(copy, pte.frame);
        self.vm.with_entry(vm, page, false, |e| {
            e.frame = copy;
            e.flags = (e.flags | PteFlags::WRITABLE) - PteFlags::COW;
        });
        self.frames.free(pte.frame);
        self.vm.flush_tlb(vm);
        log::trace!("cow fault at {}: {} -> {}", va, pte.frame, copy);
        Ok(true)
    }

    fn resolve_mapping(&self, data: &mut ProcData, vm: VmId, va: VirtAddr) -> KernelResult<()> {
        let covering = data.mappings.iter().position(|m| m.contains(va));
        let (index, grows) = match covering {
            Some(i) => (i, false),
            None => data
                .mappings
                .iter()
                .position(|m| m.in_growth_page(va))
                .map(|i| (i, true))
                .ok_or(KernelError::SegmentationFault)?,
        };

        if grows {
            let end = data.mappings.get(index).map(Mapping::end).unwrap_or_default();
            let limit = data
                .mappings
                .next_start_at_or_above(end)
                .unwrap_or(VirtAddr::new(MMAP_AREA_END));
            if limit.as_usize().saturating_sub(end.as_usize()) <= PAGE_SIZE {
                log::debug!("growsup fault at {}: next mapping at {}", va, limit);
                return Err(KernelError::SegmentationFault);
            }
        }

        let record = match data.mappings.get_mut(index) {
            Some(m) => m,
            None => return Err(KernelError::SegmentationFault),
        };
        record.allocated = true;

        let page = va.page_round_down();
        let pa = self.frames.alloc().ok_or(KernelError::OutOfMemory)?;
        if record.flags.contains(MapFlags::ANONYMOUS) {
            self.frames.fill(pa, 0);
        } else {
            self.fill_from_file(record, page, pa);
        }

        let perm = PteFlags::WRITABLE | PteFlags::USER;
        if let Err(e) = self.vm.map_pages(vm, page, PAGE_SIZE, pa, perm) {
            self.frames.free(pa);
            return Err(e);
        }
        if grows {
            record.length += PAGE_SIZE;
        }
        log::trace!("mapped {} for fault at {} (grew: {})", pa, va, grows);
        Ok(())
    }

    /// Read the file page backing `page` into the frame at `pa`.
    fn fill_from_file(&self, record: &Mapping, page: VirtAddr, pa: PhysAddr) {
        let file = match &record.file {
            Some(f) => f,
            None => panic!("fault: file mapping without file"),
        };
        let off = page.as_usize() - record.addr.as_usize() + record.offset;
        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let _op = self.fs.log().begin_op();
            let ip = file.inode().lock();
            ip.read_at(&mut buf, off);
        }
        self.frames.write(pa, 0, &buf);
    }
}
