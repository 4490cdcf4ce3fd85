//! System call handling module.
//!
//! Call numbers follow the traditional Unix teaching-kernel table.
//! Arguments arrive as raw words; handlers decode them with [`argint`]
//! and friends and return a [`KernelResult`], which [`dispatch`] folds
//! into the single return register: the value on success, -1 on any
//! error.

pub mod handlers;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::memory::VirtAddr;
use crate::Kernel;

/// Longest path `argstr` will fetch.
pub const MAXPATH: usize = 128;

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SyscallNumber {
    // ==========================================
    // Process Management
    // ==========================================
    /// Create a child process.
    Fork = 1,
    /// Exit the current process.
    Exit = 2,
    /// Wait for a child to exit.
    Wait = 3,
    /// Kill a process.
    Kill = 6,
    /// Get process ID.
    Getpid = 11,
    /// Grow or shrink the heap.
    Sbrk = 12,
    /// Sleep for a number of ticks.
    Sleep = 13,
    /// Ticks since boot.
    Uptime = 14,

    // ==========================================
    // Files
    // ==========================================
    /// Open a file.
    Open = 15,
    /// Close a file descriptor.
    Close = 21,

    // ==========================================
    // Memory
    // ==========================================
    /// Memory map.
    Mmap = 22,
    /// Memory unmap.
    Munmap = 23,
}

impl SyscallNumber {
    pub fn name(self) -> &'static str {
        match self {
            SyscallNumber::Fork => "fork",
            SyscallNumber::Exit => "exit",
            SyscallNumber::Wait => "wait",
            SyscallNumber::Kill => "kill",
            SyscallNumber::Getpid => "getpid",
            SyscallNumber::Sbrk => "sbrk",
            SyscallNumber::Sleep => "sleep",
            SyscallNumber::Uptime => "uptime",
            SyscallNumber::Open => "open",
            SyscallNumber::Close => "close",
            SyscallNumber::Mmap => "mmap",
            SyscallNumber::Munmap => "munmap",
        }
    }
}

impl TryFrom<usize> for SyscallNumber {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SyscallNumber::Fork),
            2 => Ok(SyscallNumber::Exit),
            3 => Ok(SyscallNumber::Wait),
            6 => Ok(SyscallNumber::Kill),
            11 => Ok(SyscallNumber::Getpid),
            12 => Ok(SyscallNumber::Sbrk),
            13 => Ok(SyscallNumber::Sleep),
            14 => Ok(SyscallNumber::Uptime),
            15 => Ok(SyscallNumber::Open),
            21 => Ok(SyscallNumber::Close),
            22 => Ok(SyscallNumber::Mmap),
            23 => Ok(SyscallNumber::Munmap),
            _ => Err(()),
        }
    }
}

/// Dispatch a system call for the current process.
pub fn dispatch(kernel: &'static Kernel, num: usize, args: [usize; 6]) -> isize {
    let result = match SyscallNumber::try_from(num) {
        Ok(call) => {
            let result = handlers::handle(kernel, call, &args);
            #[cfg(feature = "trace-syscalls")]
            log::trace!("{}({:x?}) = {:?}", call.name(), &args, result);
            result
        }
        Err(()) => {
            let slot = kernel.myproc();
            let table = kernel.ptable.lock();
            let p = &table.procs[slot];
            log::warn!("{} {}: unknown sys call {}", p.pid, p.name, num);
            Err(KernelError::InvalidArgument("unknown system call"))
        }
    };
    match result {
        Ok(value) => value,
        Err(_) => -1,
    }
}

/// The `n`th argument as a signed word.
pub fn argint(args: &[usize; 6], n: usize) -> isize {
    args[n] as isize
}

/// The `n`th argument as a user address.
pub fn argptr(args: &[usize; 6], n: usize) -> VirtAddr {
    VirtAddr::new(args[n])
}

/// Fetch the NUL-terminated string at user address `addr` of the current
/// process.
///
/// Fails if the string is not NUL-terminated within [`MAXPATH`] bytes or
/// runs off the end of mapped memory.
pub fn fetchstr(kernel: &Kernel, addr: VirtAddr) -> KernelResult<String> {
    let slot = kernel.myproc();
    let data = kernel.pdata[slot].lock();
    let vm = data.vm.ok_or(KernelError::SegmentationFault)?;
    if addr.as_usize() >= data.sz {
        return Err(KernelError::SegmentationFault);
    }
    let mut bytes = Vec::new();
    let mut va = addr;
    loop {
        let pte = kernel
            .vm
            .translate(vm, va.page_round_down())
            .filter(|pte| pte.is_present())
            .ok_or(KernelError::SegmentationFault)?;
        let mut b = [0u8; 1];
        kernel.frames.read(pte.frame, va.page_offset(), &mut b);
        if b[0] == 0 {
            break;
        }
        bytes.push(b[0]);
        if bytes.len() >= MAXPATH || va.as_usize() + 1 >= data.sz {
            return Err(KernelError::InvalidArgument("unterminated string"));
        }
        va = va + 1;
    }
    String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument("path is not utf-8"))
}

/// The `n`th argument as a string in user memory.
pub fn argstr(kernel: &Kernel, args: &[usize; 6], n: usize) -> KernelResult<String> {
    fetchstr(kernel, argptr(args, n))
}
