//! PVM Kernel Library
//!
//! The process and virtual-memory core of a small Unix-like teaching
//! kernel, hosted on ordinary threads: a fixed process table with a
//! round-robin scheduler per CPU, sleep/wakeup channels, fork with
//! copy-on-write private mappings, exit/wait/kill, and lazily populated
//! memory mappings resolved by a page-fault handler.
//!
//! # Layout
//!
//! - [`arch`]: context switching and interrupt nesting state
//! - [`process`]: process table and lifecycle
//! - [`scheduler`]: scheduler loop, sleep and wakeup
//! - [`memory`]: frames, page tables, address spaces, mmap and faults
//! - [`syscall`], [`trap`]: the user/kernel boundary
//! - [`user`]: the handle user programs run against
//! - [`vfs`]: the in-memory file system behind file mappings

extern crate alloc;

pub mod arch;
pub mod config;
pub mod cpu;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod trap;
pub mod user;
pub mod vfs;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use process::{ProcessId, ProcessState};
pub use user::UserCtx;

#[cfg(test)]
mod tests;
