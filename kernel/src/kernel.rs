//! The machine.
//!
//! [`Kernel`] owns every piece of global state: the CPUs, the process
//! table, per-process data, the physical page pool, the address-space
//! arena, the file system and the tick counter. It is built once by
//! [`Kernel::boot`] and lives for the rest of the program.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU64;

use crate::arch::{Halt, SHUTDOWN};
use crate::config::KernelConfig;
use crate::cpu::{self, Cpu};
use crate::error::KernelResult;
use crate::memory::frame::FramePool;
use crate::memory::vm::AddressSpaces;
use crate::process::{ProcData, ProcTable, ProcessId, UserEntry};
use crate::sync::SpinLock;
use crate::user::UserCtx;
use crate::vfs::FileSystem;

pub struct Kernel {
    config: KernelConfig,
    pub(crate) halt: Arc<Halt>,
    pub(crate) cpus: Vec<Cpu>,
    pub(crate) ptable: SpinLock<ProcTable>,
    /// Indexed by table slot.
    pub(crate) pdata: Vec<SpinLock<ProcData>>,
    pub(crate) frames: Arc<FramePool>,
    pub(crate) vm: AddressSpaces,
    pub(crate) fs: FileSystem,
    pub(crate) ticks: SpinLock<u64>,
    pub(crate) switches: AtomicU64,
}

impl Kernel {
    /// Bring the machine up and create the first process, running `init`.
    ///
    /// The calling thread becomes CPU 0. Nothing runs until it calls
    /// [`Kernel::scheduler`] or [`Kernel::run_until`]; the other CPUs
    /// start with [`Kernel::start_secondary_cpus`].
    pub fn boot(
        config: KernelConfig,
        init: impl Fn(&UserCtx) + Send + Sync + 'static,
    ) -> KernelResult<&'static Kernel> {
        log::info!(
            "booting: {} cpus, {} proc slots, {} pages",
            config.ncpu,
            config.nproc,
            config.phys_pages
        );
        let halt = Halt::new();
        let frames = Arc::new(FramePool::new(config.phys_pages));
        let kernel = Kernel {
            halt: halt.clone(),
            cpus: (0..config.ncpu).map(|id| Cpu::new(id, &halt)).collect(),
            ptable: SpinLock::new("ptable", ProcTable::new(config.nproc)),
            pdata: (0..config.nproc)
                .map(|_| SpinLock::new("proc", ProcData::new()))
                .collect(),
            vm: AddressSpaces::new(frames.clone()),
            frames,
            fs: FileSystem::new(),
            ticks: SpinLock::new("time", 0),
            switches: AtomicU64::new(0),
            config,
        };
        let kernel: &'static Kernel = Box::leak(Box::new(kernel));
        cpu::attach(&kernel.cpus[0]);

        let init: UserEntry = Arc::new(init);
        kernel.userinit(init)?;
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Stop every CPU. Parked process threads unwind quietly.
    pub fn shutdown(&self) {
        log::info!("shutdown");
        self.halt.halt(SHUTDOWN);
        if cpu::try_mycpu().is_some_and(|c| self.cpus.iter().any(|own| core::ptr::eq(own, c))) {
            cpu::detach();
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_halted()
    }

    /// Why the machine stopped, if it did.
    pub fn halt_reason(&self) -> Option<alloc::string::String> {
        self.halt.reason()
    }

    /// Pages left in the physical pool.
    pub fn free_frames(&self) -> usize {
        self.frames.free_count()
    }

    /// Page allocations since boot.
    pub fn frame_allocations(&self) -> u64 {
        self.frames.allocations()
    }

    /// Create (or replace) a file in the root directory.
    pub fn create_file(&self, path: &str, contents: &[u8]) -> KernelResult<()> {
        self.fs.create(path, contents).map(|_| ())
    }

    /// Whole contents of `path`.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.read_all(path)
    }

    /// Number of mapping records held by `pid`.
    pub fn mapping_count(&self, pid: ProcessId) -> Option<usize> {
        let slot = self.ptable.lock().find_by_pid(pid)?;
        Some(self.pdata[slot].lock().mappings.len())
    }

    /// Present pages in the address space of `pid`.
    pub fn resident_pages(&self, pid: ProcessId) -> Option<usize> {
        let slot = self.ptable.lock().find_by_pid(pid)?;
        let vm = self.pdata[slot].lock().vm?;
        Some(self.vm.resident_pages(vm))
    }

    /// Translation-cache flushes issued for the address space of `pid`.
    pub fn tlb_flushes(&self, pid: ProcessId) -> Option<u64> {
        let slot = self.ptable.lock().find_by_pid(pid)?;
        let vm = self.pdata[slot].lock().vm?;
        Some(self.vm.tlb_flushes(vm))
    }
}
