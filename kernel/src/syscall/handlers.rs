//! System call handlers.
//!
//! Each handler decodes its arguments and calls into the process,
//! memory or file layer.

use super::{argint, argptr, argstr, SyscallNumber};
use crate::error::{KernelError, KernelResult};
use crate::process::{Channel, ProcessId};
use crate::vfs::{fd, OpenFlags};
use crate::Kernel;

/// Handle a system call.
pub fn handle(kernel: &'static Kernel, call: SyscallNumber, args: &[usize; 6]) -> KernelResult<isize> {
    match call {
        SyscallNumber::Fork => sys_fork(kernel),
        SyscallNumber::Exit => sys_exit(kernel),
        SyscallNumber::Wait => sys_wait(kernel),
        SyscallNumber::Kill => sys_kill(kernel, args),
        SyscallNumber::Getpid => sys_getpid(kernel),
        SyscallNumber::Sbrk => sys_sbrk(kernel, args),
        SyscallNumber::Sleep => sys_sleep(kernel, args),
        SyscallNumber::Uptime => sys_uptime(kernel),
        SyscallNumber::Open => sys_open(kernel, args),
        SyscallNumber::Close => sys_close(kernel, args),
        SyscallNumber::Mmap => sys_mmap(kernel, args),
        SyscallNumber::Munmap => sys_munmap(kernel, args),
    }
}

fn sys_fork(kernel: &'static Kernel) -> KernelResult<isize> {
    kernel.fork().map(|pid| pid.as_u32() as isize)
}

fn sys_exit(kernel: &'static Kernel) -> KernelResult<isize> {
    kernel.exit()
}

fn sys_wait(kernel: &'static Kernel) -> KernelResult<isize> {
    kernel.wait().map(|pid| pid.as_u32() as isize)
}

fn sys_kill(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    let pid = u32::try_from(argint(args, 0)).map_err(|_| KernelError::NoSuchProcess)?;
    kernel.kill(ProcessId(pid)).map(|()| 0)
}

fn sys_getpid(kernel: &'static Kernel) -> KernelResult<isize> {
    let slot = kernel.myproc();
    Ok(kernel.ptable.lock().procs[slot].pid.as_u32() as isize)
}

/// Returns the old break.
fn sys_sbrk(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    kernel.growproc(argint(args, 0)).map(|old| old as isize)
}

fn sys_sleep(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    let n = u64::try_from(argint(args, 0))
        .map_err(|_| KernelError::InvalidArgument("negative sleep"))?;
    let me = kernel.myproc();
    let mut ticks = kernel.ticks.lock();
    let ticks0 = *ticks;
    while *ticks - ticks0 < n {
        if kernel.killed(me) {
            return Err(KernelError::Killed);
        }
        ticks = kernel.sleep(Channel::Ticks, ticks);
    }
    Ok(0)
}

/// How many clock tick interrupts have occurred since start.
fn sys_uptime(kernel: &'static Kernel) -> KernelResult<isize> {
    Ok(kernel.ticks() as isize)
}

fn sys_open(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    let path = argstr(kernel, args, 0)?;
    let flags = OpenFlags(argint(args, 1) as u32);
    let file = kernel.fs.open(&path, flags)?;
    let slot = kernel.myproc();
    let fd = kernel.pdata[slot].lock().fdalloc(file.clone());
    match fd {
        Some(fd) => Ok(fd as isize),
        None => {
            fd::close(file);
            Err(KernelError::BadFileDescriptor)
        }
    }
}

fn sys_close(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    let fd = usize::try_from(argint(args, 0)).map_err(|_| KernelError::BadFileDescriptor)?;
    let slot = kernel.myproc();
    let file = {
        let mut data = kernel.pdata[slot].lock();
        data.ofile
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(KernelError::BadFileDescriptor)?
    };
    fd::close(file);
    Ok(0)
}

fn sys_mmap(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    let addr = argptr(args, 0).as_usize();
    let length = argint(args, 1);
    let prot = argint(args, 2) as u32;
    let flags = argint(args, 3) as u32;
    let fd = argint(args, 4);
    let offset = argint(args, 5);
    kernel
        .mmap(addr, length, prot, flags, fd, offset)
        .map(|va| va.as_usize() as isize)
}

fn sys_munmap(kernel: &'static Kernel, args: &[usize; 6]) -> KernelResult<isize> {
    let addr = argptr(args, 0).as_usize();
    kernel.munmap(addr, argint(args, 1)).map(|()| 0)
}
