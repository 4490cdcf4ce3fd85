//! Physical frame allocator.
//!
//! A fixed pool of 4 KB frames handed out one at a time. Frames carry a
//! reference count so that copy-on-write and shared mappings can point
//! several page-table entries at the same frame; a frame returns to the
//! free list when its last reference is dropped.
//!
//! Frame contents are the simulated physical memory. Each frame sits
//! behind its own memory-bus mutex, which is not a kernel lock and does not
//! take part in interrupt bookkeeping.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use super::PhysAddr;
use crate::config::PAGE_SIZE;
use crate::sync::SpinLock;

/// Physical address of the first frame in the pool.
pub const PHYS_BASE: usize = 0x0010_0000;

/// Byte pattern written into freshly allocated frames, so that a missing
/// zero-fill shows up as garbage instead of passing by accident.
const JUNK: u8 = 0x05;

struct FrameMeta {
    free: Vec<usize>,
    refs: Vec<u32>,
    allocations: u64,
}

pub struct FramePool {
    meta: SpinLock<FrameMeta>,
    frames: Vec<spin::Mutex<Box<[u8]>>>,
}

impl FramePool {
    /// Create a pool of `npages` frames, all free.
    pub fn new(npages: usize) -> Self {
        let frames = (0..npages)
            .map(|_| spin::Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
            .collect();
        // Lowest frames are handed out first.
        let free = (0..npages).rev().collect();
        Self {
            meta: SpinLock::new(
                "kmem",
                FrameMeta {
                    free,
                    refs: vec![0; npages],
                    allocations: 0,
                },
            ),
            frames,
        }
    }

    /// Allocate one frame with a reference count of one.
    ///
    /// The contents are junk; callers zero or copy into it.
    pub fn alloc(&self) -> Option<PhysAddr> {
        let index = {
            let mut meta = self.meta.lock();
            let index = meta.free.pop()?;
            meta.refs[index] = 1;
            meta.allocations += 1;
            index
        };
        self.frames[index].lock().fill(JUNK);
        let pa = PhysAddr(PHYS_BASE + index * PAGE_SIZE);
        log::trace!("kalloc {}", pa);
        Some(pa)
    }

    /// Take another reference to an allocated frame.
    pub fn dup(&self, pa: PhysAddr) {
        let index = self.index(pa);
        let mut meta = self.meta.lock();
        if meta.refs[index] == 0 {
            panic!("dup of free frame {}", pa);
        }
        meta.refs[index] += 1;
    }

    /// Drop one reference; the frame is freed with the last one.
    pub fn free(&self, pa: PhysAddr) {
        let index = self.index(pa);
        let mut meta = self.meta.lock();
        match meta.refs[index] {
            0 => panic!("kfree {}", pa),
            1 => {
                meta.refs[index] = 0;
                meta.free.push(index);
                log::trace!("kfree {}", pa);
            }
            _ => meta.refs[index] -= 1,
        }
    }

    pub fn refcount(&self, pa: PhysAddr) -> u32 {
        let index = self.index(pa);
        self.meta.lock().refs[index]
    }

    /// Frames currently on the free list.
    pub fn free_count(&self) -> usize {
        self.meta.lock().free.len()
    }

    /// Total successful allocations since boot.
    pub fn allocations(&self) -> u64 {
        self.meta.lock().allocations
    }

    pub fn read(&self, pa: PhysAddr, offset: usize, buf: &mut [u8]) {
        let frame = self.frames[self.index(pa)].lock();
        buf.copy_from_slice(&frame[offset..offset + buf.len()]);
    }

    pub fn write(&self, pa: PhysAddr, offset: usize, data: &[u8]) {
        let mut frame = self.frames[self.index(pa)].lock();
        frame[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn fill(&self, pa: PhysAddr, byte: u8) {
        self.frames[self.index(pa)].lock().fill(byte);
    }

    /// Copy a whole page from `src` to `dst`.
    pub fn copy_page(&self, dst: PhysAddr, src: PhysAddr) {
        let mut page = vec![0u8; PAGE_SIZE];
        self.read(src, 0, &mut page);
        self.write(dst, 0, &page);
    }

    fn index(&self, pa: PhysAddr) -> usize {
        let addr = pa.as_usize();
        if !pa.is_page_aligned() || addr < PHYS_BASE {
            panic!("bad physical address {}", pa);
        }
        let index = (addr - PHYS_BASE) / PAGE_SIZE;
        if index >= self.frames.len() {
            panic!("bad physical address {}", pa);
        }
        index
    }
}
