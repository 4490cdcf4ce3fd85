//! Memory mappings.
//!
//! `mmap` only records intent: it validates the request, picks an address
//! in the mapping window and appends a [`Mapping`] to the caller's list.
//! Pages appear later, one fault at a time (see [`super::fault`]).
//! `munmap` writes dirty shared file pages back, tears the record's pages
//! down and removes the record.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::{pg_round_up, VirtAddr};
use crate::config::{MAX_MAPPINGS, MMAP_AREA_END, MMAP_AREA_START, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::vfs::File;
use crate::Kernel;

bitflags::bitflags! {
    /// mmap flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Changes are visible to other mappers and written back to the file.
        const SHARED = 0x01;
        /// Changes are private to the process (copy-on-write across fork).
        const PRIVATE = 0x02;
        /// Place the mapping exactly at the hint.
        const FIXED = 0x10;
        /// No backing file; pages start zeroed.
        const ANONYMOUS = 0x20;
        /// A fault just above the end grows the mapping by a page.
        const GROWSUP = 0x200;
    }
}

bitflags::bitflags! {
    /// Protection bits. Recorded; every mapped page is user read/write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtFlags: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
    }
}

/// One mapping record.
#[derive(Debug, Clone)]
pub struct Mapping {
    /// Base address, page-aligned.
    pub addr: VirtAddr,
    /// Current length in bytes; GROWSUP mappings get longer.
    pub length: usize,
    pub original_length: usize,
    pub flags: MapFlags,
    pub prot: ProtFlags,
    /// Descriptor passed to mmap, `None` for anonymous mappings.
    pub fd: Option<usize>,
    /// The mapped file. The mapping holds its own reference so the file
    /// outlives a `close` of the descriptor.
    pub file: Option<Arc<File>>,
    /// File offset of `addr`.
    pub offset: usize,
    /// Set once a page has been materialized.
    pub allocated: bool,
}

impl Mapping {
    /// End of the mapping, rounded up to a page.
    pub fn end(&self) -> VirtAddr {
        VirtAddr::new(pg_round_up(self.addr.as_usize() + self.length))
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.addr <= va && va < self.end()
    }

    /// Is `va` the guard page a GROWSUP mapping grows into?
    pub fn in_growth_page(&self, va: VirtAddr) -> bool {
        self.flags.contains(MapFlags::GROWSUP) && self.end() <= va && va < self.end() + PAGE_SIZE
    }

    /// Does this record cover all of `[addr, addr + len)`?
    pub fn covers(&self, addr: usize, len: usize) -> bool {
        addr >= self.addr.as_usize() && addr + len <= self.addr.as_usize() + self.length
    }

    pub fn overlaps(&self, addr: usize, len: usize) -> bool {
        self.addr.as_usize() < addr + len && self.end().as_usize() > addr
    }

    pub fn is_shared_file(&self) -> bool {
        self.flags.contains(MapFlags::SHARED) && !self.flags.contains(MapFlags::ANONYMOUS)
    }

    /// Pages currently spanned by the record.
    pub fn pages(&self) -> impl Iterator<Item = VirtAddr> {
        (self.addr.as_usize()..self.end().as_usize())
            .step_by(PAGE_SIZE)
            .map(VirtAddr::new)
    }
}

/// A process's mapping records, densely packed.
#[derive(Debug, Clone, Default)]
pub struct MappingList {
    entries: Vec<Mapping>,
}

impl MappingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Mapping> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Mapping> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Mapping> {
        self.entries.get_mut(index)
    }

    pub fn push(&mut self, mapping: Mapping) -> KernelResult<()> {
        if self.entries.len() >= MAX_MAPPINGS {
            return Err(KernelError::NoAddressSpace);
        }
        self.entries.push(mapping);
        Ok(())
    }

    /// Remove a record, shifting later ones down.
    pub fn remove(&mut self, index: usize) -> Mapping {
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn overlaps(&self, addr: usize, len: usize) -> bool {
        self.entries.iter().any(|m| m.overlaps(addr, len))
    }

    /// Index of the record that covers all of `[addr, addr + len)`.
    pub fn find_covering(&self, addr: usize, len: usize) -> Option<usize> {
        self.entries.iter().position(|m| m.covers(addr, len))
    }

    /// Lowest address in the window where `len` bytes fit without touching
    /// an existing record. Candidates are tried a page at a time.
    pub fn find_available(&self, len: usize) -> Option<VirtAddr> {
        let mut addr = MMAP_AREA_START;
        while addr + len <= MMAP_AREA_END {
            if !self.overlaps(addr, len) {
                return Some(VirtAddr::new(addr));
            }
            addr += PAGE_SIZE;
        }
        None
    }

    /// Start of the nearest record beginning at or above `va`.
    pub fn next_start_at_or_above(&self, va: VirtAddr) -> Option<VirtAddr> {
        self.entries
            .iter()
            .map(|m| m.addr)
            .filter(|&start| start >= va)
            .min()
    }
}

/// Decoded, validated mmap arguments.
#[derive(Debug)]
struct MmapRequest {
    hint: usize,
    length: usize,
    prot: ProtFlags,
    flags: MapFlags,
    fd: Option<usize>,
    offset: usize,
}

/// Argument checks that need no process state, in the order the system
/// call applies them.
fn validate(
    addr: usize,
    length: isize,
    prot: u32,
    flags: u32,
    fd: isize,
    offset: isize,
) -> KernelResult<MmapRequest> {
    if length <= 0 {
        return Err(KernelError::InvalidArgument("length must be positive"));
    }
    let length = length as usize;
    if addr != 0
        && (addr < MMAP_AREA_START || addr > MMAP_AREA_END - PAGE_SIZE || addr % PAGE_SIZE != 0)
    {
        return Err(KernelError::InvalidArgument("address outside mapping window"));
    }
    let flags = MapFlags::from_bits_truncate(flags);
    if flags.contains(MapFlags::SHARED) == flags.contains(MapFlags::PRIVATE) {
        return Err(KernelError::InvalidArgument("need exactly one of SHARED or PRIVATE"));
    }
    if flags.contains(MapFlags::ANONYMOUS) && (fd != -1 || offset != 0) {
        return Err(KernelError::InvalidArgument("anonymous mapping with fd or offset"));
    }
    if flags.contains(MapFlags::FIXED) && (addr == 0 || addr % PAGE_SIZE != 0) {
        return Err(KernelError::InvalidArgument("FIXED needs an aligned address"));
    }
    let fd = if flags.contains(MapFlags::ANONYMOUS) {
        None
    } else {
        if offset < 0 || offset as usize % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument("offset must be page-aligned"));
        }
        Some(usize::try_from(fd).map_err(|_| KernelError::BadFileDescriptor)?)
    };
    Ok(MmapRequest {
        hint: addr,
        length,
        prot: ProtFlags::from_bits_truncate(prot),
        flags,
        fd,
        offset: offset.max(0) as usize,
    })
}

impl Kernel {
    /// Record a new mapping for the calling process.
    pub fn mmap(
        &self,
        addr: usize,
        length: isize,
        prot: u32,
        flags: u32,
        fd: isize,
        offset: isize,
    ) -> KernelResult<VirtAddr> {
        let req = validate(addr, length, prot, flags, fd, offset)?;
        let slot = self.myproc();
        let mut data = self.pdata[slot].lock();

        let file = match req.fd {
            None => None,
            Some(fd) => {
                let file = data
                    .file(fd as isize)
                    .cloned()
                    .ok_or(KernelError::BadFileDescriptor)?;
                let wants_write = req.prot.contains(ProtFlags::WRITE);
                if req.flags.contains(MapFlags::SHARED) && wants_write && !file.writable() {
                    return Err(KernelError::InvalidArgument("shared writable map of read-only file"));
                }
                Some(file)
            }
        };

        let base = if req.flags.contains(MapFlags::FIXED) {
            if req.hint + pg_round_up(req.length) > MMAP_AREA_END {
                return Err(KernelError::NoAddressSpace);
            }
            if data.mappings.overlaps(req.hint, req.length) {
                return Err(KernelError::InvalidArgument("FIXED mapping overlaps"));
            }
            VirtAddr::new(req.hint)
        } else {
            data.mappings
                .find_available(req.length)
                .ok_or(KernelError::NoAddressSpace)?
        };

        data.mappings.push(Mapping {
            addr: base,
            length: req.length,
            original_length: req.length,
            flags: req.flags,
            prot: req.prot,
            fd: req.fd,
            file,
            offset: req.offset,
            allocated: false,
        })?;
        log::debug!(
            "mmap: {} bytes at {} flags {:?} ({} mappings)",
            req.length,
            base,
            req.flags,
            data.mappings.len()
        );
        Ok(base)
    }

    /// Remove the mapping that covers `[addr, addr + length)`.
    ///
    /// The whole record goes away, so every present page of a shared file
    /// mapping is written back first, whole pages at their file offsets.
    /// If the write-back fails the mapping is left in place.
    pub fn munmap(&self, addr: usize, length: isize) -> KernelResult<()> {
        if length <= 0 {
            return Err(KernelError::InvalidArgument("length must be positive"));
        }
        let length = length as usize;
        let slot = self.myproc();
        let mut data = self.pdata[slot].lock();
        let vm = data.vm.ok_or(KernelError::SegmentationFault)?;
        let index = data
            .mappings
            .find_covering(addr, length)
            .ok_or(KernelError::InvalidArgument("range not covered by one mapping"))?;

        let record = &data.mappings.entries[index];
        if record.is_shared_file() {
            let file = match &record.file {
                Some(f) => f.clone(),
                None => panic!("munmap: shared file mapping without file"),
            };
            let mut page = vec![0u8; PAGE_SIZE];
            for va in record.pages() {
                let pte = match self.vm.translate(vm, va) {
                    Some(pte) if pte.is_present() => pte,
                    _ => continue,
                };
                self.frames.read(pte.frame, 0, &mut page);
                let off = va.as_usize() - record.addr.as_usize() + record.offset;
                let _op = self.fs.log().begin_op();
                file.inode().lock().write_at(&page, off)?;
            }
        }

        let record = data.mappings.remove(index);
        let npages = (record.end().as_usize() - record.addr.as_usize()) / PAGE_SIZE;
        self.vm.unmap_pages(vm, record.addr, npages);
        log::debug!("munmap: {} bytes at {}", record.length, record.addr);
        Ok(())
    }
}
