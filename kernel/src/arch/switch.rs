//! Context switch for the hosted machine.
//!
//! Every kernel thread of execution (a CPU's scheduler loop, or a process's
//! kernel stack) is a host thread. A saved context is a baton: the thread
//! that owns it is parked on the baton until another thread deposits a
//! handoff payload into it. [`swtch`] deposits into the target and parks on
//! the caller's own baton in one step, so at most one thread per CPU is
//! ever runnable.
//!
//! The payload type is chosen by the scheduler; it carries the table lock
//! guard across the switch.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// How often a parked thread re-checks the halt flag.
const HALT_POLL: Duration = Duration::from_millis(20);

/// Halt reason recorded by an orderly shutdown.
pub const SHUTDOWN: &str = "shutdown";

/// Machine-wide halt state.
///
/// Set by the first kernel panic (or by an orderly shutdown). Every parked
/// context observes it and stops instead of waiting forever.
pub struct Halt {
    halted: AtomicBool,
    reason: spin::Mutex<Option<String>>,
}

impl Halt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            halted: AtomicBool::new(false),
            reason: spin::Mutex::new(None),
        })
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Halt the machine. The first reason recorded wins.
    pub fn halt(&self, reason: &str) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
        self.halted.store(true, Ordering::Release);
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Was the machine stopped by [`SHUTDOWN`] rather than a panic?
    pub fn is_shutdown(&self) -> bool {
        self.reason.lock().as_deref() == Some(SHUTDOWN)
    }
}

/// Unwind payload used to discard a kernel stack that will never run again.
pub struct Retire;

enum Wake<T> {
    Resumed(T),
    Retired,
    Halted(String),
}

enum Slot<T> {
    Empty,
    Full(T),
    Retired,
}

struct Baton<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Saved execution context.
///
/// Cloning yields another handle to the same context.
pub struct Context<T> {
    baton: Arc<Baton<T>>,
    halt: Arc<Halt>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            baton: self.baton.clone(),
            halt: self.halt.clone(),
        }
    }
}

impl<T> core::fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Context({:p})", Arc::as_ptr(&self.baton))
    }
}

impl<T: Send + 'static> Context<T> {
    /// Context for a thread that is already running (a CPU's scheduler).
    pub fn new(halt: &Arc<Halt>) -> Self {
        Self {
            baton: Arc::new(Baton {
                slot: Mutex::new(Slot::Empty),
                ready: Condvar::new(),
            }),
            halt: halt.clone(),
        }
    }

    /// Build a fresh kernel stack whose first resumption calls `entry`.
    ///
    /// The thread parks immediately; it runs only once something switches
    /// to the returned context. If the context is retired first, the thread
    /// exits without calling `entry`.
    pub fn spawn<F>(name: String, halt: &Arc<Halt>, entry: F) -> std::io::Result<Self>
    where
        F: FnOnce(T) + Send + 'static,
    {
        let ctx = Self::new(halt);
        let own = ctx.clone();
        thread::Builder::new().name(name).spawn(move || {
            let first = match own.take() {
                Wake::Resumed(payload) => payload,
                Wake::Retired | Wake::Halted(_) => return,
            };
            let halt = own.halt.clone();
            drop(own);
            guarded(&halt, move || entry(first));
        })?;
        Ok(ctx)
    }

    /// Discard this context. A thread parked on it unwinds and exits.
    pub fn retire(&self) {
        let mut slot = lock(&self.baton.slot);
        *slot = Slot::Retired;
        self.baton.ready.notify_all();
    }

    fn deposit(&self, payload: T) {
        let mut slot = lock(&self.baton.slot);
        match *slot {
            Slot::Empty => *slot = Slot::Full(payload),
            Slot::Full(_) => panic!("swtch: context resumed twice"),
            Slot::Retired => panic!("swtch: resume of retired context"),
        }
        self.baton.ready.notify_one();
    }

    /// Park until a payload arrives, the context is retired, or the
    /// machine halts.
    fn take(&self) -> Wake<T> {
        let mut slot = lock(&self.baton.slot);
        loop {
            match core::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Full(payload) => return Wake::Resumed(payload),
                Slot::Retired => {
                    *slot = Slot::Retired;
                    return Wake::Retired;
                }
                Slot::Empty => {}
            }
            if self.halt.is_halted() {
                return Wake::Halted(self.halt.reason().unwrap_or_default());
            }
            slot = match self.baton.ready.wait_timeout(slot, HALT_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Suspend the caller on `from` and resume `to` with `payload`.
///
/// Returns the payload handed over by whoever next switches back to `from`.
/// Panics if the machine halts while the caller is parked.
pub fn swtch<T: Send + 'static>(from: &Context<T>, to: &Context<T>, payload: T) -> T {
    to.deposit(payload);
    match from.take() {
        Wake::Resumed(payload) => payload,
        Wake::Retired => panic::resume_unwind(Box::new(Retire)),
        Wake::Halted(reason) if reason == SHUTDOWN => panic::resume_unwind(Box::new(Retire)),
        Wake::Halted(reason) => panic!("kernel panic: {}", reason),
    }
}

/// Resume `to` and discard the caller's kernel stack. Never returns.
pub fn swtch_final<T: Send + 'static>(to: &Context<T>, payload: T) -> ! {
    to.deposit(payload);
    panic::resume_unwind(Box::new(Retire))
}

/// Run `body` as the bottom of a kernel thread.
///
/// A retired stack unwinds quietly; any other panic halts the machine so
/// that every CPU stops instead of waiting on a thread that is gone.
pub fn guarded(halt: &Halt, body: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
        if !payload.is::<Retire>() {
            halt.halt(&panic_message(payload.as_ref()));
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_swtch_round_trip() {
        let halt = Halt::new();
        let main: Context<u32> = Context::new(&halt);
        let back = main.clone();
        let child = Context::spawn("child".to_string(), &halt, move |n: u32| {
            swtch_final(&back, n + 1);
        })
        .unwrap();
        let got = swtch(&main, &child, 41);
        assert_eq!(got, 42);
    }

    #[test]
    fn test_retire_before_first_run() {
        let halt = Halt::new();
        let (tx, rx) = mpsc::channel();
        let ctx: Context<()> = Context::spawn("never".to_string(), &halt, move |_| {
            tx.send(()).unwrap();
        })
        .unwrap();
        ctx.retire();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_panic_in_context_halts_machine() {
        let halt = Halt::new();
        let main: Context<()> = Context::new(&halt);
        let child: Context<()> = Context::spawn("boom".to_string(), &halt, |_| {
            panic!("boom");
        })
        .unwrap();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| swtch(&main, &child, ())));
        assert!(result.is_err());
        assert!(halt.is_halted());
        assert_eq!(halt.reason().as_deref(), Some("boom"));
    }

    #[test]
    fn test_shutdown_retires_parked_thread() {
        struct Notify(mpsc::Sender<()>);
        impl Drop for Notify {
            fn drop(&mut self) {
                let _ = self.0.send(());
            }
        }

        let halt = Halt::new();
        let (tx, rx) = mpsc::channel();
        let main: Context<()> = Context::new(&halt);
        let back = main.clone();
        let child_halt = halt.clone();
        let child: Context<()> = Context::spawn("parked".to_string(), &halt, move |_| {
            let _notify = Notify(tx);
            let lonely: Context<()> = Context::new(&child_halt);
            swtch(&lonely, &back, ());
            unreachable!();
        })
        .unwrap();
        swtch(&main, &child, ());
        halt.halt(SHUTDOWN);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(halt.is_shutdown());
    }
}
