//! Interrupt-enable flag and its nesting counter.
//!
//! `push_off`/`pop_off` are matched like `cli`/`sti`, except that it takes
//! as many `pop_off`s as `push_off`s to undo them, and if interrupts were
//! off to begin with they stay off.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Interrupt state of one CPU.
#[derive(Debug)]
pub struct InterruptState {
    /// The IF flag.
    enabled: AtomicBool,
    /// Depth of `push_off` nesting.
    ncli: AtomicUsize,
    /// Were interrupts enabled before the outermost `push_off`?
    intena: AtomicBool,
}

impl InterruptState {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            ncli: AtomicUsize::new(0),
            intena: AtomicBool::new(false),
        }
    }

    /// `sti`
    pub fn intr_on(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// `cli`
    pub fn intr_off(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn intr_get(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn push_off(&self) {
        let old = self.intr_get();
        self.intr_off();
        if self.ncli.fetch_add(1, Ordering::SeqCst) == 0 {
            self.intena.store(old, Ordering::SeqCst);
        }
    }

    pub fn pop_off(&self) {
        if self.intr_get() {
            panic!("pop_off - interruptible");
        }
        let prev = self.ncli.load(Ordering::SeqCst);
        if prev == 0 {
            panic!("pop_off");
        }
        self.ncli.store(prev - 1, Ordering::SeqCst);
        if prev == 1 && self.intena.load(Ordering::SeqCst) {
            self.intr_on();
        }
    }

    pub fn ncli(&self) -> usize {
        self.ncli.load(Ordering::SeqCst)
    }

    pub fn intena(&self) -> bool {
        self.intena.load(Ordering::SeqCst)
    }

    pub fn set_intena(&self, intena: bool) {
        self.intena.store(intena, Ordering::SeqCst);
    }
}

impl Default for InterruptState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_push_off_restores_once() {
        let st = InterruptState::new();
        st.intr_on();
        st.push_off();
        st.push_off();
        assert!(!st.intr_get());
        assert_eq!(st.ncli(), 2);
        st.pop_off();
        assert!(!st.intr_get());
        st.pop_off();
        assert!(st.intr_get());
        assert_eq!(st.ncli(), 0);
    }

    #[test]
    fn test_interrupts_stay_off_if_they_were_off() {
        let st = InterruptState::new();
        st.push_off();
        st.pop_off();
        assert!(!st.intr_get());
    }

    #[test]
    #[should_panic(expected = "pop_off")]
    fn test_unbalanced_pop_off_panics() {
        let st = InterruptState::new();
        st.pop_off();
    }
}
