//! File system transaction journal.
//!
//! Every operation that may modify on-disk state runs between `begin_op`
//! and the drop of the returned [`FsOp`]. The log commits when the last
//! outstanding operation ends.

use crate::sync::SpinLock;

struct LogState {
    outstanding: usize,
    commits: u64,
}

pub struct FsLog {
    state: SpinLock<LogState>,
}

/// An open transaction; `end_op` runs on drop.
#[must_use = "dropping the guard ends the transaction"]
pub struct FsOp<'a> {
    log: &'a FsLog,
}

impl FsLog {
    pub fn new() -> Self {
        Self {
            state: SpinLock::new(
                "log",
                LogState {
                    outstanding: 0,
                    commits: 0,
                },
            ),
        }
    }

    pub fn begin_op(&self) -> FsOp<'_> {
        self.state.lock().outstanding += 1;
        FsOp { log: self }
    }

    fn end_op(&self) {
        let mut st = self.state.lock();
        st.outstanding -= 1;
        if st.outstanding == 0 {
            st.commits += 1;
        }
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Commits since mount.
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }
}

impl Default for FsLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FsOp<'_> {
    fn drop(&mut self) {
        self.log.end_op();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_ops_commit_once() {
        let log = FsLog::new();
        {
            let _a = log.begin_op();
            let _b = log.begin_op();
            assert_eq!(log.outstanding(), 2);
        }
        assert_eq!(log.outstanding(), 0);
        assert_eq!(log.commits(), 1);
    }
}
