//! Kernel Unit Tests Module
//!
//! Whole-machine scenarios: boot a kernel, run user programs on it, and
//! check what they observe.

mod process_tests;
mod scheduler_tests;
mod syscall_tests;
