//! Traps: system calls, page faults and the timer.
//!
//! Every entry from user mode goes through [`Kernel::trap`]. A killed
//! process exits here, on its way back to user mode.

use crate::cpu;
use crate::memory::VirtAddr;
use crate::process::Channel;
use crate::syscall;
use crate::user::UserCtx;
use crate::Kernel;

/// Why user mode entered the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// `int 64` with the call number in %eax and arguments on the stack.
    Syscall { num: usize, args: [usize; 6] },
    /// An access at `va` found no usable translation.
    PageFault { va: VirtAddr, write: bool },
    /// Timer interrupt.
    Timer,
}

impl Kernel {
    /// Handle a trap taken by the current process.
    pub fn trap(&'static self, trap: Trap) {
        let me = self.myproc();
        match trap {
            Trap::Syscall { num, args } => {
                if self.killed(me) {
                    self.exit();
                }
                let ret = syscall::dispatch(self, num, args);
                self.pdata[me].lock().tf.eax = ret;
                if self.killed(me) {
                    self.exit();
                }
                return;
            }
            Trap::PageFault { va, write } => {
                if let Err(e) = self.handle_page_fault(me, va) {
                    let mut table = self.ptable.lock();
                    let p = &mut table.procs[me];
                    log::warn!(
                        "pid {} {}: segmentation fault at {} ({}, {}) -- kill proc",
                        p.pid,
                        p.name,
                        va,
                        if write { "write" } else { "read" },
                        e
                    );
                    p.killed = true;
                }
            }
            Trap::Timer => {
                if cpu::mycpu().id == 0 {
                    self.clock_intr();
                }
            }
        }

        // Force process exit if it has been killed and is in user space.
        if self.killed(me) {
            self.exit();
        }

        // Force process to give up CPU on clock tick.
        if trap == Trap::Timer {
            self.yield_now();
        }

        // Check if the process has been killed since we yielded.
        if self.killed(me) {
            self.exit();
        }
    }

    /// One timer tick: advance the clock and wake sleepers.
    pub fn clock_intr(&self) {
        let mut ticks = self.ticks.lock();
        *ticks += 1;
        self.wakeup(Channel::Ticks);
        drop(ticks);
    }

    /// Ticks since boot.
    pub fn ticks(&self) -> u64 {
        *self.ticks.lock()
    }

    /// Return to user mode in the process in `slot` and run it until it
    /// finishes, then exit on its behalf.
    pub(crate) fn enter_user(&'static self, slot: usize) -> ! {
        let entry = self.pdata[slot].lock().tf.eip.clone();
        match entry {
            Some(entry) => entry(&UserCtx::new(self)),
            None => panic!("enter_user: pid slot {} has no entry point", slot),
        }
        self.exit()
    }
}
