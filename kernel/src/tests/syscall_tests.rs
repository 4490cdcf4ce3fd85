//! System Call Unit Tests
//!
//! Tests for dispatch, argument decoding, and the file and memory calls
//! as seen from user mode.

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use crate::config::{NOFILE, PAGE_SIZE};
    use crate::syscall::SyscallNumber;
    use crate::tests::harness::{boot, idle, recv, scenario};
    use crate::vfs::OpenFlags;

    // ========================================
    // Dispatch Tests
    // ========================================

    #[test]
    fn test_unknown_syscall_returns_error() {
        let (unknown, zero) = scenario(|ctx| (ctx.syscall_raw(99, [0; 6]), ctx.syscall_raw(0, [0; 6])));
        assert_eq!(unknown, -1);
        assert_eq!(zero, -1);
    }

    #[test]
    fn test_raw_getpid_matches_wrapper() {
        let (raw, wrapped) = scenario(|ctx| {
            (ctx.syscall_raw(SyscallNumber::Getpid as usize, [0; 6]), ctx.getpid())
        });
        assert_eq!(raw, wrapped);
    }

    #[test]
    fn test_fork_return_matches_child_getpid() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let (ctx_tx, ctx_rx) = mpsc::channel();
            let pid = ctx.fork(move |c| {
                let _ = ctx_tx.send(c.getpid());
            });
            ctx.wait();
            let _ = tx.send((pid, ctx_rx.try_recv().unwrap_or(-1)));
            idle(ctx)
        });
        let (pid, child_pid) = recv(kernel, &rx);
        assert_eq!(pid, child_pid);
        kernel.shutdown();
    }

    // ========================================
    // sbrk Tests
    // ========================================

    #[test]
    fn test_sbrk_grows_and_shrinks_heap() {
        let (old, grown, byte, shrunk, too_far) = scenario(|ctx| {
            let old = ctx.sbrk(2 * PAGE_SIZE as isize);
            let grown = ctx.sbrk(0);
            ctx.write_byte(old as usize + PAGE_SIZE + 3, 0x7f);
            let byte = ctx.read_byte(old as usize + PAGE_SIZE + 3);
            ctx.sbrk(-(2 * PAGE_SIZE as isize));
            let shrunk = ctx.sbrk(0);
            let too_far = ctx.sbrk(-(16 * PAGE_SIZE as isize));
            (old, grown, byte, shrunk, too_far)
        });
        assert_eq!(old as usize, PAGE_SIZE);
        assert_eq!(grown as usize, 3 * PAGE_SIZE);
        assert_eq!(byte, 0x7f);
        assert_eq!(shrunk, old);
        assert_eq!(too_far, -1);
    }

    #[test]
    fn test_sbrk_cannot_reach_mmap_window() {
        let r = scenario(|ctx| ctx.sbrk(crate::config::MMAP_AREA_START as isize));
        assert_eq!(r, -1);
    }

    // ========================================
    // File Descriptor Tests
    // ========================================

    #[test]
    fn test_open_close_descriptors() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let a = ctx.open("f", OpenFlags::RDONLY);
            let b = ctx.open("f", OpenFlags::RDWR);
            let closed = ctx.close(a);
            let twice = ctx.close(a);
            let again = ctx.open("f", OpenFlags::RDONLY);
            let missing = ctx.open("nope", OpenFlags::RDONLY);
            let created = ctx.open("new", OpenFlags::RDWR | OpenFlags::CREAT);
            let bad = ctx.close(NOFILE as isize);
            let _ = tx.send(vec![a, b, closed, twice, again, missing, created, bad]);
            idle(ctx)
        });
        kernel.create_file("f", b"x").unwrap();
        let r = recv(kernel, &rx);
        assert_eq!(r, vec![0, 1, 0, -1, 0, -1, 2, -1]);
        assert_eq!(kernel.read_file("new"), Some(Vec::new()));
        kernel.shutdown();
    }

    #[test]
    fn test_descriptor_table_fills_up() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let fds: Vec<isize> = (0..NOFILE + 1).map(|_| ctx.open("f", OpenFlags::RDONLY)).collect();
            let _ = tx.send(fds);
            idle(ctx)
        });
        kernel.create_file("f", b"x").unwrap();
        let fds = recv(kernel, &rx);
        assert_eq!(fds[NOFILE - 1], NOFILE as isize - 1);
        assert_eq!(fds[NOFILE], -1);
        kernel.shutdown();
    }

    #[test]
    fn test_children_inherit_descriptors() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let fd = ctx.open("f", OpenFlags::RDWR);
            let (ctx_tx, ctx_rx) = mpsc::channel();
            ctx.fork(move |c| {
                let addr = c.mmap(0, PAGE_SIZE as isize, 3, 0x01, fd, 0);
                let _ = ctx_tx.send((c.close(fd), addr));
            });
            ctx.wait();
            let child = ctx_rx.try_recv().unwrap_or((-1, -1));
            let _ = tx.send((child, ctx.close(fd)));
            idle(ctx)
        });
        kernel.create_file("f", b"shared").unwrap();
        let ((child_close, child_map), parent_close) = recv(kernel, &rx);
        assert_eq!(child_close, 0);
        assert!(child_map > 0);
        assert_eq!(parent_close, 0);
        kernel.shutdown();
    }

    // ========================================
    // Argument Decoding Tests
    // ========================================

    #[test]
    fn test_open_path_outside_memory_fails() {
        let r = scenario(|ctx| {
            ctx.syscall_raw(SyscallNumber::Open as usize, [0x5000_0000, 0, 0, 0, 0, 0])
        });
        assert_eq!(r, -1);
    }

    #[test]
    fn test_kill_negative_pid_fails() {
        assert_eq!(scenario(|ctx| ctx.kill(-3)), -1);
    }
}
