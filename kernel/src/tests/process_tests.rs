//! Process Management Unit Tests
//!
//! Tests for fork, exit, wait, kill and the process table.

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::config::{KernelConfig, PAGE_SIZE};
    use crate::process::{ProcessId, ProcessState};
    use crate::tests::harness::{self, boot, boot_with, idle, recv, scenario};

    // ========================================
    // Process ID Tests
    // ========================================

    #[test]
    fn test_init_is_pid_one() {
        let pid = scenario(|ctx| ctx.getpid());
        assert_eq!(pid, 1);
    }

    #[test]
    fn test_fork_pids_unique_and_increasing() {
        let pids = scenario(|ctx| {
            let mut pids = Vec::new();
            for _ in 0..4 {
                pids.push(ctx.fork(|c| c.exit()));
            }
            for _ in 0..4 {
                ctx.wait();
            }
            // A slot freed by wait gets a fresh pid.
            pids.push(ctx.fork(|c| c.exit()));
            ctx.wait();
            pids
        });
        assert!(pids.iter().all(|&p| p > 1));
        assert!(pids.windows(2).all(|w| w[0] < w[1]), "{:?}", pids);
    }

    // ========================================
    // Fork / Wait Tests
    // ========================================

    #[test]
    fn test_fork_child_sees_zero() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let tx = tx.clone();
            let pid = ctx.fork(move |c| {
                let _ = tx.send(("child", c.return_value(), c.getpid()));
            });
            let waited = ctx.wait();
            assert_eq!(pid, waited);
            idle(ctx)
        });
        let (who, ret, pid) = recv(kernel, &rx);
        assert_eq!(who, "child");
        assert_eq!(ret, 0);
        assert!(pid > 1);
        kernel.shutdown();
    }

    #[test]
    fn test_wait_reaps_child_completely() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let child = ctx.fork(|c| c.exit());
            let reaped = ctx.wait();
            let _ = tx.send((child, reaped));
            idle(ctx)
        });
        let (child, reaped) = recv(kernel, &rx);
        assert_eq!(child, reaped);
        assert_eq!(kernel.process_state(ProcessId(child as u32)), None);
        assert_eq!(kernel.count_children(ProcessId(1)), 0);
        let listing = kernel.procdump();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "initcode");
        kernel.shutdown();
    }

    #[test]
    fn test_wait_without_children_fails() {
        assert_eq!(scenario(|ctx| ctx.wait()), -1);
    }

    #[test]
    fn test_exit_releases_all_memory() {
        let (before, after) = scenario(|ctx| {
            let k = ctx.kernel();
            let before = k.free_frames();
            ctx.fork(|c| {
                c.sbrk(3 * PAGE_SIZE as isize);
                let addr = c.mmap(0, 2 * PAGE_SIZE as isize, 3, 0x22, -1, 0) as usize;
                c.write_byte(addr, 1);
                c.write_byte(addr + PAGE_SIZE, 2);
            });
            ctx.wait();
            (before, k.free_frames())
        });
        assert_eq!(before, after);
    }

    #[test]
    fn test_orphans_are_reparented_to_init() {
        let reaped = scenario(|ctx| {
            let child = ctx.fork(|c| {
                c.fork(|g| {
                    g.sleep(3);
                });
                c.exit()
            });
            let first = ctx.wait();
            let second = ctx.wait();
            let none = ctx.wait();
            (child, first, second, none)
        });
        let (child, first, second, none) = reaped;
        assert_eq!(first, child);
        assert!(second > child);
        assert_eq!(none, -1);
    }

    #[test]
    fn test_process_table_full() {
        let (tx, rx) = mpsc::channel();
        let config = KernelConfig::default().with_procs(4).with_phys_pages(256);
        let kernel = boot_with(config, move |ctx| {
            let mut made = 0;
            loop {
                let pid = ctx.fork(|c| {
                    c.sleep(2);
                });
                if pid < 0 {
                    break;
                }
                made += 1;
            }
            while ctx.wait() > 0 {}
            let _ = tx.send(made);
            idle(ctx)
        });
        assert_eq!(recv(kernel, &rx), 3);
        kernel.shutdown();
    }

    // ========================================
    // Kill Tests
    // ========================================

    #[test]
    fn test_kill_wakes_sleeping_child() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let k = ctx.kernel();
            // The child blocks in wait on a grandchild that outlives it, a
            // channel that timer ticks never touch.
            let child = ctx.fork(|c| {
                c.fork(|g| {
                    g.sleep(1_000_000);
                });
                c.wait();
            });
            // Let the child reach its sleep.
            ctx.sleep(3);
            let pid = ProcessId(child as u32);
            let before = k.process_state(pid);
            let killed = ctx.kill(child);
            let after = k.process_state(pid);
            let reaped = ctx.wait();
            let _ = tx.send((before, killed, after, reaped == child));
            idle(ctx)
        });
        let (before, killed, after, reaped) = recv(kernel, &rx);
        assert_eq!(before, Some(ProcessState::Sleeping));
        assert_eq!(killed, 0);
        assert_eq!(after, Some(ProcessState::Runnable));
        assert!(reaped);
        kernel.shutdown();
    }

    #[test]
    fn test_kill_unknown_pid_fails() {
        assert_eq!(scenario(|ctx| ctx.kill(4242)), -1);
    }

    #[test]
    fn test_killed_runnable_child_exits_at_next_trap() {
        let (reported, reaped, child) = scenario(|ctx| {
            let (tx, rx) = mpsc::channel();
            let child = ctx.fork(move |c| {
                let _ = tx.send(c.getpid());
                c.preempt();
                let _ = tx.send(-99);
            });
            // The child has not run yet: it dies on its first trap.
            ctx.kill(child);
            let reaped = ctx.wait();
            let reported: Vec<isize> = rx.try_iter().collect();
            (reported, reaped, child)
        });
        assert_eq!(reaped, child);
        assert!(!reported.contains(&-99));
    }

    // ========================================
    // Init Tests
    // ========================================

    #[test]
    #[should_panic(expected = "init exiting")]
    fn test_init_exit_panics() {
        let kernel = boot(|_ctx| {});
        kernel.run_until(harness::TIMEOUT, || false);
    }

    #[test]
    fn test_procdump_reports_states() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            ctx.fork(|c| {
                c.sleep(1_000_000);
            });
            let _ = tx.send(());
            idle(ctx)
        });
        recv(kernel, &rx);
        kernel.run_until(Duration::from_millis(200), || false);
        let listing = kernel.procdump();
        assert_eq!(listing.len(), 2);
        let child = &listing[1];
        assert_eq!(child.parent, Some(ProcessId(1)));
        assert_eq!(child.state, ProcessState::Sleeping);
        kernel.shutdown();
    }
}
