//! Sleep and wakeup.
//!
//! A sleeper takes the table lock before letting go of the lock that
//! protects its condition. A waker holds the table lock while it scans, so
//! it cannot run between the sleeper's check and the sleeper becoming
//! visible as SLEEPING.

use super::TableGuard;
use crate::process::{Channel, ProcTable, ProcessState};
use crate::sync::{SpinLock, SpinLockGuard};
use crate::Kernel;

impl Kernel {
    /// Atomically release `guard` and sleep on `chan`; reacquire the lock
    /// when woken.
    ///
    /// `guard` must not be the table lock; use [`Kernel::sleep_locked`].
    pub fn sleep<'a, T>(&'static self, chan: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let slot = self.myproc();
        let mut table = self.ptable.lock();
        let lk = SpinLock::unlock(guard);

        table.procs[slot].chan = Some(chan);
        table.procs[slot].state = ProcessState::Sleeping;
        log::trace!("pid {} sleeps on {:?}", table.procs[slot].pid, chan);
        let mut table = self.sched(table);

        // Tidy up.
        table.procs[slot].chan = None;
        drop(table);
        lk.lock()
    }

    /// Sleep on `chan` while already holding the table lock.
    pub fn sleep_locked(&'static self, chan: Channel, mut table: TableGuard) -> TableGuard {
        let slot = self.myproc();
        table.procs[slot].chan = Some(chan);
        table.procs[slot].state = ProcessState::Sleeping;
        let mut table = self.sched(table);
        table.procs[slot].chan = None;
        table
    }

    /// Wake up all processes sleeping on `chan`.
    pub fn wakeup(&self, chan: Channel) {
        let mut table = self.ptable.lock();
        wakeup_locked(&mut table, chan);
    }
}

/// Wake up all processes sleeping on `chan`. The table lock must be held.
pub fn wakeup_locked(table: &mut ProcTable, chan: Channel) {
    for p in table.procs.iter_mut() {
        if p.state == ProcessState::Sleeping && p.chan == Some(chan) {
            p.state = ProcessState::Runnable;
        }
    }
}
