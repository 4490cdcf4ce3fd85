//! Mutual exclusion spin lock.
//!
//! A thin layer over `spin::Mutex` that adds what the scheduler needs: the
//! lock knows which CPU holds it, and holding any lock keeps interrupts off
//! on that CPU via the `push_off`/`pop_off` nesting counter.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::cpu;

const FREE: usize = usize::MAX;
/// Owner tag for threads that are not attached to a CPU.
const DETACHED: usize = usize::MAX - 1;

pub struct SpinLock<T> {
    name: &'static str,
    owner: AtomicUsize,
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            owner: AtomicUsize::new(FREE),
            inner: spin::Mutex::new(value),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock, spinning until it is free.
    ///
    /// Panics if the calling CPU already holds it.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let me = cpu::try_mycpu();
        if let Some(c) = me {
            c.intr.push_off();
            if self.holding() {
                panic!("acquire {}", self.name);
            }
        }
        let inner = self.inner.lock();
        self.owner
            .store(me.map(|c| c.id).unwrap_or(DETACHED), Ordering::SeqCst);
        SpinLockGuard {
            lock: self,
            inner: ManuallyDrop::new(inner),
        }
    }

    /// Does the calling CPU hold this lock?
    pub fn holding(&self) -> bool {
        match cpu::try_mycpu() {
            Some(c) => self.inner.is_locked() && self.owner.load(Ordering::SeqCst) == c.id,
            None => false,
        }
    }

    /// Release the lock held by `guard` and hand back the lock itself, so
    /// the caller can re-acquire it later.
    pub fn unlock<'a>(guard: SpinLockGuard<'a, T>) -> &'a SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    inner: ManuallyDrop<spin::MutexGuard<'a, T>>,
}

// The table lock guard is carried across a context switch, from the thread
// that acquired it to the thread that releases it. Both run on the same CPU
// and never at the same time.
unsafe impl<T: Send> Send for SpinLockGuard<'_, T> {}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        let unwinding = std::thread::panicking();
        let me = cpu::try_mycpu();
        if let Some(c) = me {
            if !unwinding && self.lock.owner.load(Ordering::SeqCst) != c.id {
                panic!("release {}", self.lock.name);
            }
        }
        self.lock.owner.store(FREE, Ordering::SeqCst);
        // SAFETY: `inner` is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        if let Some(c) = me {
            if !unwinding {
                c.intr.pop_off();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_detached_thread() {
        let lock = SpinLock::new("test", 5u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 6);
        assert!(!lock.holding());
    }

    #[test]
    fn test_unlock_returns_lock() {
        let lock = SpinLock::new("test", ());
        let g = lock.lock();
        let again = SpinLock::unlock(g);
        assert_eq!(again.name(), "test");
        drop(again.lock());
    }
}
