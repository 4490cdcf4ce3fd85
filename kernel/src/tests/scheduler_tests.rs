//! Scheduler Unit Tests
//!
//! Tests for the scheduler loop, sleep/wakeup on the tick channel,
//! preemption and multi-CPU operation.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use crate::config::{KernelConfig, PAGE_SIZE};
    use crate::tests::harness::{self, boot, boot_with, idle, recv, scenario};

    // ========================================
    // Tick Tests
    // ========================================

    #[test]
    fn test_sleep_waits_at_least_n_ticks() {
        let (t0, t1) = scenario(|ctx| {
            let t0 = ctx.uptime();
            assert_eq!(ctx.sleep(5), 0);
            (t0, ctx.uptime())
        });
        assert!(t1 - t0 >= 5, "slept from {} to {}", t0, t1);
    }

    #[test]
    fn test_sleep_zero_returns_immediately() {
        assert_eq!(scenario(|ctx| ctx.sleep(0)), 0);
    }

    #[test]
    fn test_negative_sleep_fails() {
        assert_eq!(scenario(|ctx| ctx.sleep(-1)), -1);
    }

    #[test]
    fn test_uptime_advances_with_scheduler_passes() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let _ = tx.send(ctx.uptime());
            idle(ctx)
        });
        let first = recv(kernel, &rx);
        kernel.run_until(Duration::from_millis(50), || false);
        assert!(kernel.ticks() as isize > first);
        kernel.shutdown();
    }

    // ========================================
    // Scheduling Tests
    // ========================================

    #[test]
    fn test_first_pass_runs_init() {
        let kernel = boot(|ctx| idle(ctx));
        assert_eq!(kernel.context_switches(), 0);
        assert_eq!(kernel.schedule_pass(), 1);
        assert_eq!(kernel.context_switches(), 1);
        kernel.shutdown();
    }

    #[test]
    fn test_preemption_interleaves_processes() {
        let order = scenario(|ctx| {
            let log = Arc::new(spin::Mutex::new(Vec::new()));
            for id in 0..2u8 {
                let log = log.clone();
                ctx.fork(move |c| {
                    for _ in 0..3 {
                        log.lock().push(id);
                        c.preempt();
                    }
                });
            }
            ctx.wait();
            ctx.wait();
            let order = log.lock().clone();
            order
        });
        assert_eq!(order.len(), 6);
        // Round robin: nobody runs twice while the other is runnable.
        assert!(order.windows(2).all(|w| w[0] != w[1]), "{:?}", order);
    }

    #[test]
    fn test_sleepers_only_wake_on_their_channel() {
        let (tx, rx) = mpsc::channel();
        let kernel = boot(move |ctx| {
            let tx = tx.clone();
            ctx.fork(move |c| {
                c.sleep(1_000_000);
                let _ = tx.send("woke");
            });
            // Parent sits in wait; ticks must not wake it.
            let _ = ctx.wait();
            idle(ctx)
        });
        kernel.run_until(Duration::from_millis(200), || false);
        assert!(rx.try_recv().is_err());
        let listing = kernel.procdump();
        assert!(listing.iter().all(|p| p.state == crate::ProcessState::Sleeping));
        kernel.shutdown();
    }

    // ========================================
    // Multi-CPU Tests
    // ========================================

    #[test]
    fn test_many_children_on_four_cpus() {
        let (tx, rx) = mpsc::channel();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let config = KernelConfig::default().with_cpus(4).with_phys_pages(1024);
        let kernel = boot_with(config, move |ctx| {
            for i in 0..12usize {
                let counter = counter.clone();
                ctx.fork(move |c| {
                    c.sbrk(PAGE_SIZE as isize);
                    let addr = c.mmap(0, 2 * PAGE_SIZE as isize, 3, 0x22, -1, 0) as usize;
                    for round in 0..4 {
                        c.write_byte(addr + round, (i + round) as u8);
                        c.preempt();
                    }
                    if c.read_byte(addr + 3) == (i + 3) as u8 {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
            let mut reaped = 0;
            while ctx.wait() > 0 {
                reaped += 1;
            }
            let _ = tx.send(reaped);
            idle(ctx)
        });
        kernel.start_secondary_cpus().unwrap();
        assert_eq!(recv(kernel, &rx), 12);
        assert_eq!(finished.load(Ordering::SeqCst), 12);
        assert_eq!(kernel.procdump().len(), 1);
        kernel.shutdown();
    }

    #[test]
    fn test_run_until_times_out() {
        let kernel = boot(|ctx| idle(ctx));
        assert!(!kernel.run_until(Duration::from_millis(30), || false));
        kernel.shutdown();
        assert!(kernel.is_halted());
        assert!(!kernel.run_until(harness::TIMEOUT, || false));
    }
}
