//! Process Table
//!
//! A fixed number of slots, one process control block each, behind the
//! global `ptable` lock. Fields a process only touches about itself while
//! running (trap frame, address space, open files, mapping records) live
//! in a separate per-slot [`ProcData`] behind its own lock, taken after
//! `ptable` when both are needed.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::context::TrapFrame;
use crate::arch::Context;
use crate::config::{NOFILE, PROC_NAME_LEN};
use crate::error::{KernelError, KernelResult};
use crate::memory::mmap::MappingList;
use crate::memory::vm::VmId;
use crate::memory::PhysAddr;
use crate::scheduler::Handoff;
use crate::vfs::{File, Inode};
use crate::Kernel;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Free slot
    Unused,
    /// Allocated, not yet schedulable
    Embryo,
    /// Waiting in a sleep channel
    Sleeping,
    /// Ready to run
    Runnable,
    /// Executing on a CPU
    Running,
    /// Exited, waiting for the parent to reap it
    Zombie,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Unused => "unused",
            ProcessState::Embryo => "embryo",
            ProcessState::Sleeping => "sleep ",
            ProcessState::Runnable => "runble",
            ProcessState::Running => "run   ",
            ProcessState::Zombie => "zombie",
        }
    }
}

/// What a sleeping process waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The process in this slot (a parent in `wait`).
    Proc(usize),
    /// The clock tick counter.
    Ticks,
}

/// Per-process state guarded by the table lock.
#[derive(Debug)]
pub struct Proc {
    pub state: ProcessState,
    pub pid: ProcessId,
    /// Slot of the parent; a weak back-reference.
    pub parent: Option<usize>,
    pub name: String,
    pub killed: bool,
    /// Valid only while SLEEPING.
    pub chan: Option<Channel>,
    pub kstack: Option<PhysAddr>,
    /// Saved kernel context; switch here to run the process.
    pub context: Option<Context<Handoff>>,
}

impl Proc {
    fn unused() -> Self {
        Self {
            state: ProcessState::Unused,
            pid: ProcessId(0),
            parent: None,
            name: String::new(),
            killed: false,
            chan: None,
            kstack: None,
            context: None,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.extend(name.chars().take(PROC_NAME_LEN));
    }
}

/// Process table.
#[derive(Debug)]
pub struct ProcTable {
    pub procs: Vec<Proc>,
    next_pid: u32,
    /// Slot of the init process, which adopts orphans.
    pub initproc: Option<usize>,
}

impl ProcTable {
    pub fn new(nproc: usize) -> Self {
        Self {
            procs: (0..nproc).map(|_| Proc::unused()).collect(),
            next_pid: 1,
            initproc: None,
        }
    }

    /// Claim the first UNUSED slot as an EMBRYO with a fresh pid.
    pub fn claim_slot(&mut self) -> KernelResult<(usize, ProcessId)> {
        let slot = self
            .procs
            .iter()
            .position(|p| p.state == ProcessState::Unused)
            .ok_or(KernelError::NoFreeProc)?;
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        let p = &mut self.procs[slot];
        p.state = ProcessState::Embryo;
        p.pid = pid;
        Ok((slot, pid))
    }

    /// Return a slot to UNUSED, handing back its kernel stack and context
    /// for the caller to release.
    pub fn clear_slot(&mut self, slot: usize) -> (Option<PhysAddr>, Option<Context<Handoff>>) {
        let p = &mut self.procs[slot];
        if p.state == ProcessState::Unused {
            panic!("clear_slot: slot {} already unused", slot);
        }
        let kstack = p.kstack.take();
        let context = p.context.take();
        *p = Proc::unused();
        (kstack, context)
    }

    /// Slot of the live process with `pid`.
    pub fn find_by_pid(&self, pid: ProcessId) -> Option<usize> {
        self.procs
            .iter()
            .position(|p| p.state != ProcessState::Unused && p.pid == pid)
    }

    /// Slots whose parent is `slot`.
    pub fn children_of(&self, slot: usize) -> impl Iterator<Item = usize> + '_ {
        self.procs
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.state != ProcessState::Unused && p.parent == Some(slot))
            .map(|(i, _)| i)
    }

    pub fn snapshot(&self) -> Vec<ProcInfo> {
        self.procs
            .iter()
            .filter(|p| p.state != ProcessState::Unused)
            .map(|p| ProcInfo {
                pid: p.pid,
                state: p.state,
                name: p.name.clone(),
                parent: p.parent.map(|s| self.procs[s].pid),
                killed: p.killed,
            })
            .collect()
    }
}

/// Per-process state private to the running process.
pub struct ProcData {
    /// Size of process memory (bytes)
    pub sz: usize,
    pub vm: Option<VmId>,
    pub tf: TrapFrame,
    pub ofile: [Option<Arc<File>>; NOFILE],
    pub cwd: Option<Arc<Inode>>,
    pub mappings: MappingList,
}

impl ProcData {
    pub fn new() -> Self {
        Self {
            sz: 0,
            vm: None,
            tf: TrapFrame::default(),
            ofile: core::array::from_fn(|_| None),
            cwd: None,
            mappings: MappingList::new(),
        }
    }

    /// Lowest free descriptor.
    pub fn fdalloc(&mut self, f: Arc<File>) -> Option<usize> {
        let fd = self.ofile.iter().position(|o| o.is_none())?;
        self.ofile[fd] = Some(f);
        Some(fd)
    }

    /// The open file behind `fd`.
    pub fn file(&self, fd: isize) -> Option<&Arc<File>> {
        let fd = usize::try_from(fd).ok()?;
        self.ofile.get(fd)?.as_ref()
    }
}

impl Default for ProcData {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic view of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: ProcessId,
    pub state: ProcessState,
    pub name: String,
    pub parent: Option<ProcessId>,
    pub killed: bool,
}

impl Kernel {
    /// Look for an UNUSED slot and set it up to run in the kernel.
    ///
    /// The slot becomes EMBRYO under the table lock; the kernel stack and
    /// initial context are built after the lock is dropped. If that fails
    /// the slot goes back to UNUSED before the error is returned.
    pub(crate) fn alloc_proc(&'static self) -> KernelResult<usize> {
        let (slot, pid) = self.ptable.lock().claim_slot()?;

        let kstack = match self.frames.alloc() {
            Some(pa) => pa,
            None => {
                self.ptable.lock().clear_slot(slot);
                return Err(KernelError::OutOfMemory);
            }
        };
        let kernel: &'static Kernel = self;
        let context = Context::spawn(alloc::format!("pid{}", pid), &self.halt, move |h| {
            kernel.forkret(h)
        });
        let context = match context {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("allocproc: cannot build kernel stack: {}", e);
                self.frames.free(kstack);
                self.ptable.lock().clear_slot(slot);
                return Err(KernelError::OutOfMemory);
            }
        };
        {
            let mut table = self.ptable.lock();
            let p = &mut table.procs[slot];
            p.kstack = Some(kstack);
            p.context = Some(context);
        }
        *self.pdata[slot].lock() = ProcData::new();
        log::trace!("allocproc: pid {} in slot {}", pid, slot);
        Ok(slot)
    }

    /// Undo a partially built EMBRYO.
    pub(crate) fn abort_embryo(&self, slot: usize) {
        let vm = {
            let mut data = self.pdata[slot].lock();
            let vm = data.vm.take();
            *data = ProcData::new();
            vm
        };
        if let Some(vm) = vm {
            self.vm.free(vm);
        }
        let (kstack, context) = self.ptable.lock().clear_slot(slot);
        self.release_kstack(kstack, context);
    }

    pub(crate) fn release_kstack(
        &self,
        kstack: Option<PhysAddr>,
        context: Option<Context<Handoff>>,
    ) {
        if let Some(ctx) = context {
            ctx.retire();
        }
        if let Some(pa) = kstack {
            self.frames.free(pa);
        }
    }

    /// State of the live process with `pid`.
    pub fn process_state(&self, pid: ProcessId) -> Option<ProcessState> {
        let table = self.ptable.lock();
        table.find_by_pid(pid).map(|slot| table.procs[slot].state)
    }

    /// Number of live children of `pid`.
    pub fn count_children(&self, pid: ProcessId) -> usize {
        let table = self.ptable.lock();
        match table.find_by_pid(pid) {
            Some(slot) => table.children_of(slot).count(),
            None => 0,
        }
    }

    /// Print a process listing and return it.
    pub fn procdump(&self) -> Vec<ProcInfo> {
        let snapshot = self.ptable.lock().snapshot();
        for info in &snapshot {
            log::info!("{} {} {}", info.pid, info.state.as_str(), info.name);
        }
        snapshot
    }
}
