//! Process lifecycle: the first process, fork, exit, wait, kill and sbrk.
//!
//! The state machine is
//! UNUSED -> EMBRYO -> RUNNABLE <-> RUNNING -> ZOMBIE -> UNUSED,
//! with RUNNING -> SLEEPING -> RUNNABLE on the side. Every state change
//! happens under the table lock.

use alloc::sync::Arc;

use super::context::UserEntry;
use super::table::{ProcData, ProcessId, ProcessState};
use crate::config::PAGE_SIZE;
use crate::cpu;
use crate::error::{KernelError, KernelResult};
use crate::memory::mmap::{MapFlags, MappingList};
use crate::memory::page_table::PteFlags;
use crate::memory::vm::VmId;
use crate::process::Channel;
use crate::scheduler::sleep::wakeup_locked;
use crate::vfs::fd;
use crate::Kernel;

impl Kernel {
    /// Set up the first user process, running `init`.
    pub(crate) fn userinit(&'static self, init: UserEntry) -> KernelResult<()> {
        let slot = self.alloc_proc()?;
        self.ptable.lock().initproc = Some(slot);

        let vm = match self.vm.create() {
            Ok(vm) => vm,
            Err(e) => {
                self.abort_embryo(slot);
                return Err(e);
            }
        };
        {
            let mut data = self.pdata[slot].lock();
            data.vm = Some(vm);
        }
        if let Err(e) = self.vm.init_image(vm, &[]) {
            self.abort_embryo(slot);
            return Err(e);
        }
        {
            let mut data = self.pdata[slot].lock();
            data.sz = PAGE_SIZE;
            data.tf.eip = Some(init);
            data.tf.esp = PAGE_SIZE;
            data.cwd = Some(self.fs.root());
        }

        let mut table = self.ptable.lock();
        let p = &mut table.procs[slot];
        p.set_name("initcode");
        p.state = ProcessState::Runnable;
        log::info!("userinit: init is pid {}", p.pid);
        Ok(())
    }

    /// Create a new process copying the caller as the parent.
    ///
    /// The heap is copied eagerly. Pages of PRIVATE mappings are shared
    /// copy-on-write; pages of SHARED mappings are shared outright. The
    /// child returns 0 from the system call.
    pub fn fork(&'static self) -> KernelResult<ProcessId> {
        let me = self.myproc();
        let child = self.alloc_proc()?;

        if let Err(e) = self.copy_process(me, child) {
            log::debug!("fork: {}", e);
            self.abort_embryo(child);
            return Err(e);
        }

        let mut table = self.ptable.lock();
        let name = table.procs[me].name.clone();
        let p = &mut table.procs[child];
        p.set_name(&name);
        p.parent = Some(me);
        p.state = ProcessState::Runnable;
        let pid = p.pid;
        log::debug!("fork: pid {} -> pid {}", table.procs[me].pid, pid);
        Ok(pid)
    }

    /// Copy memory, mappings, registers and descriptors of `parent` into
    /// the EMBRYO in `child`.
    fn copy_process(&self, parent: usize, child: usize) -> KernelResult<()> {
        let src = self.pdata[parent].lock();
        let mut dst = self.pdata[child].lock();

        let parent_vm = src.vm.ok_or(KernelError::NoAddressSpace)?;
        let child_vm = self.vm.copy(parent_vm, src.sz)?;
        dst.vm = Some(child_vm);
        self.share_mappings(&src.mappings, parent_vm, child_vm)?;

        dst.mappings = src.mappings.clone();
        dst.sz = src.sz;
        dst.tf = src.tf.clone();
        // Clear %eax so that fork returns 0 in the child.
        dst.tf.eax = 0;
        for (i, f) in src.ofile.iter().enumerate() {
            dst.ofile[i] = f.as_ref().map(fd::dup);
        }
        dst.cwd = src.cwd.as_ref().map(Arc::clone);
        Ok(())
    }

    fn share_mappings(&self, mappings: &MappingList, parent: VmId, child: VmId) -> KernelResult<()> {
        let mut demoted = false;
        for m in mappings.iter() {
            let private = m.flags.contains(MapFlags::PRIVATE);
            for va in m.pages() {
                let pte = match self.vm.translate(parent, va) {
                    Some(pte) if pte.is_present() => pte,
                    _ => continue,
                };
                let mut flags = pte.flags - PteFlags::PRESENT;
                if private {
                    flags = (flags - PteFlags::WRITABLE) | PteFlags::COW;
                    self.vm.with_entry(parent, va, false, |e| e.flags = flags | PteFlags::PRESENT);
                    demoted = true;
                }
                self.vm.map_pages(child, va, PAGE_SIZE, pte.frame, flags)?;
                self.frames.dup(pte.frame);
            }
        }
        if demoted {
            self.vm.flush_tlb(parent);
        }
        Ok(())
    }

    /// Exit the current process. Does not return.
    ///
    /// The process stays a ZOMBIE until its parent calls `wait`.
    pub fn exit(&'static self) -> ! {
        let me = self.myproc();
        if self.ptable.lock().initproc == Some(me) {
            panic!("init exiting");
        }

        let (files, cwd) = {
            let mut data = self.pdata[me].lock();
            let files: alloc::vec::Vec<_> = data.ofile.iter_mut().filter_map(Option::take).collect();
            (files, data.cwd.take())
        };
        for f in files {
            fd::close(f);
        }
        {
            let _op = self.fs.log().begin_op();
            drop(cwd);
        }
        self.pdata[me].lock().mappings.clear();

        let mut table = self.ptable.lock();
        // Parent might be sleeping in wait().
        if let Some(parent) = table.procs[me].parent {
            wakeup_locked(&mut table, Channel::Proc(parent));
        }

        // Pass abandoned children to init.
        let init = table.initproc;
        let orphans: alloc::vec::Vec<usize> = table.children_of(me).collect();
        for child in orphans {
            table.procs[child].parent = init;
            if table.procs[child].state == ProcessState::Zombie {
                if let Some(init) = init {
                    wakeup_locked(&mut table, Channel::Proc(init));
                }
            }
        }

        log::debug!("exit: pid {}", table.procs[me].pid);
        table.procs[me].state = ProcessState::Zombie;
        self.sched_final(table)
    }

    /// Wait for a child process to exit and return its pid.
    pub fn wait(&'static self) -> KernelResult<ProcessId> {
        let me = self.myproc();
        let mut table = self.ptable.lock();
        loop {
            let mut havekids = false;
            let mut zombie = None;
            for child in table.children_of(me) {
                havekids = true;
                if table.procs[child].state == ProcessState::Zombie {
                    zombie = Some(child);
                    break;
                }
            }

            if let Some(child) = zombie {
                let pid = table.procs[child].pid;
                let (kstack, context) = table.clear_slot(child);
                let vm = {
                    let mut data = self.pdata[child].lock();
                    let vm = data.vm.take();
                    *data = ProcData::new();
                    vm
                };
                drop(table);
                self.release_kstack(kstack, context);
                if let Some(vm) = vm {
                    self.vm.free(vm);
                }
                log::debug!("wait: reaped pid {}", pid);
                return Ok(pid);
            }

            // No point waiting if we don't have any children.
            if !havekids {
                return Err(KernelError::NoChildren);
            }
            if table.procs[me].killed {
                return Err(KernelError::Killed);
            }

            // Wait for children to exit.
            table = self.sleep_locked(Channel::Proc(me), table);
        }
    }

    /// Kill the process with the given pid.
    ///
    /// The victim won't exit until it next crosses the user/kernel
    /// boundary; a sleeping victim is made runnable so that it does.
    pub fn kill(&self, pid: ProcessId) -> KernelResult<()> {
        let mut table = self.ptable.lock();
        let slot = table.find_by_pid(pid).ok_or(KernelError::NoSuchProcess)?;
        let p = &mut table.procs[slot];
        p.killed = true;
        if p.state == ProcessState::Sleeping {
            p.state = ProcessState::Runnable;
        }
        log::debug!("kill: pid {}", pid);
        Ok(())
    }

    /// Whether the process in `slot` has been killed.
    pub fn killed(&self, slot: usize) -> bool {
        self.ptable.lock().procs[slot].killed
    }

    /// Grow (or shrink, for negative `n`) the caller's heap by `n` bytes.
    ///
    /// Returns the previous size.
    pub fn growproc(&self, n: isize) -> KernelResult<usize> {
        let me = self.myproc();
        let mut data = self.pdata[me].lock();
        let vm = data.vm.ok_or(KernelError::NoAddressSpace)?;
        let old = data.sz;
        let new = if n >= 0 {
            self.vm.grow(vm, old, old + n.unsigned_abs())?
        } else {
            let shrink = n.unsigned_abs();
            if shrink > old {
                return Err(KernelError::InvalidArgument("sbrk below zero"));
            }
            self.vm.shrink(vm, old, old - shrink)
        };
        data.sz = new;
        self.vm.switch_to(cpu::mycpu(), Some(vm));
        Ok(old)
    }
}
