//! User mode.
//!
//! A user program is a Rust closure that receives a [`UserCtx`]. The
//! context is its only way into the kernel: system calls go through
//! [`Kernel::trap`] exactly as an `int` instruction would, and loads and
//! stores go through a software MMU that walks the process's page table
//! and raises a page fault when the translation is missing or read-only.

use alloc::sync::Arc;

use crate::memory::{PhysAddr, VirtAddr};
use crate::syscall::SyscallNumber;
use crate::trap::Trap;
use crate::vfs::OpenFlags;
use crate::Kernel;

/// Handle a user program uses to talk to the kernel.
pub struct UserCtx {
    kernel: &'static Kernel,
}

impl UserCtx {
    pub(crate) fn new(kernel: &'static Kernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &'static Kernel {
        self.kernel
    }

    /// Value left in %eax by the last trap.
    pub fn return_value(&self) -> isize {
        let slot = self.kernel.myproc();
        self.kernel.pdata[slot].lock().tf.eax
    }

    fn syscall(&self, call: SyscallNumber, args: [usize; 6]) -> isize {
        self.syscall_raw(call as usize, args)
    }

    /// Trap with an arbitrary call number.
    pub fn syscall_raw(&self, num: usize, args: [usize; 6]) -> isize {
        self.kernel.trap(Trap::Syscall { num, args });
        self.return_value()
    }

    fn syscall1(&self, call: SyscallNumber, a0: usize) -> isize {
        self.syscall(call, [a0, 0, 0, 0, 0, 0])
    }

    /// Fork; the child starts in `child` with a zero return value.
    ///
    /// Returns the child's pid in the parent, -1 on failure.
    pub fn fork(&self, child: impl Fn(&UserCtx) + Send + Sync + 'static) -> isize {
        let slot = self.kernel.myproc();
        self.kernel.pdata[slot].lock().tf.eip = Some(Arc::new(child));
        self.syscall1(SyscallNumber::Fork, 0)
    }

    pub fn exit(&self) -> ! {
        self.syscall1(SyscallNumber::Exit, 0);
        unreachable!("exit returned")
    }

    pub fn wait(&self) -> isize {
        self.syscall1(SyscallNumber::Wait, 0)
    }

    pub fn kill(&self, pid: isize) -> isize {
        self.syscall1(SyscallNumber::Kill, pid as usize)
    }

    pub fn getpid(&self) -> isize {
        self.syscall1(SyscallNumber::Getpid, 0)
    }

    pub fn sbrk(&self, n: isize) -> isize {
        self.syscall1(SyscallNumber::Sbrk, n as usize)
    }

    pub fn sleep(&self, ticks: isize) -> isize {
        self.syscall1(SyscallNumber::Sleep, ticks as usize)
    }

    pub fn uptime(&self) -> isize {
        self.syscall1(SyscallNumber::Uptime, 0)
    }

    pub fn mmap(&self, addr: usize, length: isize, prot: u32, flags: u32, fd: isize, offset: isize) -> isize {
        self.syscall(
            SyscallNumber::Mmap,
            [
                addr,
                length as usize,
                prot as usize,
                flags as usize,
                fd as usize,
                offset as usize,
            ],
        )
    }

    pub fn munmap(&self, addr: usize, length: isize) -> isize {
        self.syscall(SyscallNumber::Munmap, [addr, length as usize, 0, 0, 0, 0])
    }

    /// Open `path`. The path is copied onto the user stack first, just
    /// below the stack pointer, the way a C library would pass it.
    pub fn open(&self, path: &str, flags: OpenFlags) -> isize {
        let slot = self.kernel.myproc();
        let esp = self.kernel.pdata[slot].lock().tf.esp;
        let sp = match esp.checked_sub(path.len() + 1) {
            Some(sp) => sp & !3,
            None => return -1,
        };
        self.write(sp, path.as_bytes());
        self.write_byte(sp + path.len(), 0);
        self.syscall(SyscallNumber::Open, [sp, flags.0 as usize, 0, 0, 0, 0])
    }

    pub fn close(&self, fd: isize) -> isize {
        self.syscall1(SyscallNumber::Close, fd as usize)
    }

    /// Timer interrupt while this process runs.
    pub fn preempt(&self) {
        self.kernel.trap(Trap::Timer);
    }

    /// Translate `va` for an access, faulting until the page is usable.
    ///
    /// A fault the kernel cannot resolve kills the process, so this only
    /// returns with a valid frame.
    fn translate(&self, va: usize, write: bool) -> (PhysAddr, usize) {
        let va = VirtAddr::new(va);
        loop {
            let slot = self.kernel.myproc();
            let vm = self.kernel.pdata[slot].lock().vm;
            let pte = vm.and_then(|vm| self.kernel.vm.translate(vm, va.page_round_down()));
            if let Some(pte) = pte {
                let user = pte.flags.contains(crate::memory::page_table::PteFlags::USER);
                if pte.is_present() && user && (!write || pte.is_writable()) {
                    return (pte.frame, va.page_offset());
                }
            }
            self.kernel.trap(Trap::PageFault { va, write });
        }
    }

    pub fn read_byte(&self, va: usize) -> u8 {
        let mut b = [0u8; 1];
        self.read(va, &mut b);
        b[0]
    }

    pub fn write_byte(&self, va: usize, byte: u8) {
        self.write(va, &[byte]);
    }

    /// Load `buf.len()` bytes starting at `va`.
    pub fn read(&self, va: usize, buf: &mut [u8]) {
        let mut done = 0;
        while done < buf.len() {
            let (pa, off) = self.translate(va + done, false);
            let n = (crate::config::PAGE_SIZE - off).min(buf.len() - done);
            self.kernel.frames.read(pa, off, &mut buf[done..done + n]);
            done += n;
        }
    }

    /// Store `data` starting at `va`.
    pub fn write(&self, va: usize, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let (pa, off) = self.translate(va + done, true);
            let n = (crate::config::PAGE_SIZE - off).min(data.len() - done);
            self.kernel.frames.write(pa, off, &data[done..done + n]);
            done += n;
        }
    }
}
