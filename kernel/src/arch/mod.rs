//! Hosted machine layer.
//!
//! Stands in for the x86 pieces the core leans on: the per-CPU interrupt
//! flag with its nesting discipline, and the register save/restore that
//! moves a CPU between its scheduler and a process.

pub mod cpu;
pub mod switch;

pub use cpu::InterruptState;
pub use switch::{guarded, swtch, swtch_final, Context, Halt, SHUTDOWN};
