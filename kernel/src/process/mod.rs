//! Process Management
//!
//! The process table and its state machine, per-process private data, and
//! the lifecycle operations (fork, exit, wait, kill, sbrk).

pub mod context;
pub mod lifecycle;
pub mod table;

pub use context::{TrapFrame, UserEntry};
pub use table::{Channel, Proc, ProcData, ProcInfo, ProcTable, ProcessId, ProcessState};
