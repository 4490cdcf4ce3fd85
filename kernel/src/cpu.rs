//! Per-CPU state.
//!
//! Each CPU records the process it is running, the scheduler's saved
//! context, and the interrupt nesting state. The interrupt state belongs to
//! the logical thread of execution that is on the CPU right now, which is
//! why `sched` saves and restores `intena` around a switch.

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::{Context, Halt, InterruptState};
use crate::memory::vm::VmId;
use crate::scheduler::Handoff;
use alloc::sync::Arc;

const NONE: usize = usize::MAX;

/// One CPU.
pub struct Cpu {
    pub id: usize,
    pub intr: InterruptState,
    /// Table slot of the running process, or `NONE`.
    proc: AtomicUsize,
    /// Context of this CPU's scheduler loop.
    pub(crate) scheduler: Context<Handoff>,
    /// Address space loaded into the MMU, or `NONE` for the kernel's own.
    active_vm: AtomicUsize,
}

impl Cpu {
    pub(crate) fn new(id: usize, halt: &Arc<Halt>) -> Self {
        Self {
            id,
            intr: InterruptState::new(),
            proc: AtomicUsize::new(NONE),
            scheduler: Context::new(halt),
            active_vm: AtomicUsize::new(NONE),
        }
    }

    /// Slot of the process running on this CPU.
    pub fn proc(&self) -> Option<usize> {
        match self.proc.load(Ordering::SeqCst) {
            NONE => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn set_proc(&self, slot: Option<usize>) {
        self.proc.store(slot.unwrap_or(NONE), Ordering::SeqCst);
    }

    pub fn active_vm(&self) -> Option<VmId> {
        match self.active_vm.load(Ordering::SeqCst) {
            NONE => None,
            id => Some(VmId(id)),
        }
    }

    pub(crate) fn set_active_vm(&self, vm: Option<VmId>) {
        self.active_vm.store(vm.map(|v| v.0).unwrap_or(NONE), Ordering::SeqCst);
    }
}

std::thread_local! {
    static CURRENT: Cell<Option<&'static Cpu>> = const { Cell::new(None) };
}

/// Bind the calling host thread to `cpu`.
///
/// Called when a CPU boots and every time a kernel thread is resumed, since
/// a process may come back on a different CPU than it left from.
pub fn attach(cpu: &'static Cpu) {
    CURRENT.with(|c| c.set(Some(cpu)));
}

pub fn detach() {
    CURRENT.with(|c| c.set(None));
}

/// The CPU the calling thread runs on, if it runs on one.
///
/// Host threads that never attached (tooling, unit tests of leaf modules)
/// get `None`; locks taken from such threads skip interrupt bookkeeping.
pub fn try_mycpu() -> Option<&'static Cpu> {
    CURRENT.with(|c| c.get())
}

pub fn mycpu() -> &'static Cpu {
    match try_mycpu() {
        Some(cpu) => cpu,
        None => panic!("mycpu: thread is not attached to a cpu"),
    }
}
