//! Process Context
//!
//! User-mode register state saved at the most recent kernel entry.

use alloc::sync::Arc;

use crate::user::UserCtx;

/// Code a process runs in user mode.
///
/// The trap frame's instruction pointer holds the continuation to run on
/// the next return to user mode. A forked child starts there with a zero
/// return-value register.
pub type UserEntry = Arc<dyn Fn(&UserCtx) + Send + Sync>;

/// Trap frame.
#[derive(Clone, Default)]
pub struct TrapFrame {
    /// Return-value register.
    pub eax: isize,
    /// User stack pointer.
    pub esp: usize,
    /// Resume point in user mode.
    pub eip: Option<UserEntry>,
}

impl core::fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrapFrame")
            .field("eax", &self.eax)
            .field("esp", &format_args!("{:#x}", self.esp))
            .field("eip", &self.eip.as_ref().map(|e| Arc::as_ptr(e) as *const ()))
            .finish()
    }
}
