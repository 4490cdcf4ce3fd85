//! Kernel scheduler module.
//!
//! One scheduler loop per CPU scans the process table for a RUNNABLE
//! process and switches to it. The process comes back by calling
//! [`Kernel::sched`], always with the table lock held and its state already
//! changed away from RUNNING. The lock guard itself travels inside the
//! [`Handoff`] across both directions of the switch.
//!
//! Policy is plain round robin in table order.

pub mod sleep;

use core::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::arch::{guarded, swtch, swtch_final};
use crate::cpu::{self, Cpu};
use crate::process::{ProcTable, ProcessState};
use crate::sync::SpinLockGuard;
use crate::Kernel;

/// The table lock, held.
pub type TableGuard = SpinLockGuard<'static, ProcTable>;

/// What one side of a context switch hands the other.
pub struct Handoff {
    /// CPU the receiving thread now runs on.
    pub(crate) cpu: usize,
    pub(crate) table: TableGuard,
}

impl Kernel {
    /// Slot of the process running on this CPU.
    pub fn myproc(&self) -> usize {
        match cpu::mycpu().proc() {
            Some(slot) => slot,
            None => panic!("myproc: no process on cpu {}", cpu::mycpu().id),
        }
    }

    /// One pass of the scheduler loop on the calling CPU: enable
    /// interrupts, then run every RUNNABLE process found in table order.
    ///
    /// Returns how many processes ran.
    pub fn schedule_pass(&'static self) -> usize {
        let c = cpu::mycpu();
        c.intr.intr_on();
        if c.id == 0 {
            // The timer interrupt lands while interrupts are on.
            self.clock_intr();
        }

        let mut table = self.ptable.lock();
        let mut ran = 0;
        for slot in 0..table.procs.len() {
            if table.procs[slot].state != ProcessState::Runnable {
                continue;
            }
            let context = match &table.procs[slot].context {
                Some(ctx) => ctx.clone(),
                None => panic!("scheduler: runnable slot {} has no context", slot),
            };

            // Switch to the chosen process. It is the process's job to
            // release the table lock and then reacquire it before
            // jumping back to us.
            c.set_proc(Some(slot));
            let vm = self.pdata[slot].lock().vm;
            self.vm.switch_to(c, vm);
            table.procs[slot].state = ProcessState::Running;
            self.switches.fetch_add(1, Ordering::Relaxed);
            log::trace!("cpu{}: run pid {}", c.id, table.procs[slot].pid);

            let back = swtch(&c.scheduler, &context, Handoff { cpu: c.id, table });
            table = back.table;

            // Process is done running for now.
            self.vm.switch_to(c, None);
            c.set_proc(None);
            ran += 1;
        }
        drop(table);
        ran
    }

    /// Per-CPU scheduler loop. Returns once the machine halts.
    pub fn scheduler(&'static self) {
        while !self.halt.is_halted() {
            if self.schedule_pass() == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Drive CPU 0 from the calling thread until `done` holds, the machine
    /// halts, or `timeout` passes. Returns whether `done` was reached.
    ///
    /// Panics with the halt reason if a kernel panic stopped the machine.
    pub fn run_until(&'static self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            if self.halt.is_halted() {
                if let Some(reason) = self.halt_reason() {
                    if !self.halt.is_shutdown() {
                        panic!("kernel panic: {}", reason);
                    }
                }
                return false;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if self.schedule_pass() == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Start scheduler loops on CPUs 1.. on their own host threads.
    pub fn start_secondary_cpus(&'static self) -> std::io::Result<()> {
        for c in self.cpus.iter().skip(1) {
            let kernel: &'static Kernel = self;
            let cpu: &'static Cpu = c;
            std::thread::Builder::new()
                .name(alloc::format!("cpu{}", cpu.id))
                .spawn(move || {
                    cpu::attach(cpu);
                    log::info!("cpu{}: starting", cpu.id);
                    guarded(&kernel.halt, || kernel.scheduler());
                })?;
        }
        Ok(())
    }

    /// Checks shared by both ways of leaving the CPU.
    fn sched_check(&self, table: &TableGuard) -> (&'static Cpu, usize) {
        let c = cpu::mycpu();
        let slot = self.myproc();
        if !self.ptable.holding() {
            panic!("sched ptable.lock");
        }
        if c.intr.ncli() != 1 {
            panic!("sched locks");
        }
        if table.procs[slot].state == ProcessState::Running {
            panic!("sched running");
        }
        if c.intr.intr_get() {
            panic!("sched interruptible");
        }
        (c, slot)
    }

    /// Switch from the current process back to this CPU's scheduler.
    ///
    /// Must hold only the table lock and have changed the process state.
    /// `intena` belongs to this kernel thread, not to the CPU, so it is
    /// saved here and restored on whichever CPU resumes us.
    pub(crate) fn sched(&'static self, table: TableGuard) -> TableGuard {
        let (c, slot) = self.sched_check(&table);
        let intena = c.intr.intena();
        let me = match &table.procs[slot].context {
            Some(ctx) => ctx.clone(),
            None => panic!("sched: no context"),
        };
        let back = swtch(&me, &c.scheduler, Handoff { cpu: c.id, table });
        let c = &self.cpus[back.cpu];
        cpu::attach(c);
        c.intr.set_intena(intena);
        back.table
    }

    /// Leave the CPU for good. Used by `exit`.
    pub(crate) fn sched_final(&self, table: TableGuard) -> ! {
        let (c, _) = self.sched_check(&table);
        swtch_final(&c.scheduler, Handoff { cpu: c.id, table })
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&'static self) {
        let mut table = self.ptable.lock();
        let slot = self.myproc();
        table.procs[slot].state = ProcessState::Runnable;
        let table = self.sched(table);
        drop(table);
    }

    /// First code a new process runs, entered from the scheduler with the
    /// table lock held.
    pub(crate) fn forkret(&'static self, h: Handoff) {
        let c = &self.cpus[h.cpu];
        cpu::attach(c);
        drop(h.table);
        self.enter_user(self.myproc());
    }

    /// Context switches performed since boot.
    pub fn context_switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }
}
