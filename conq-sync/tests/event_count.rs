use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use conq_sync::EventCount;
use crossbeam_utils::thread::scope;

#[test]
fn already_true_does_not_block() {
    let ec = EventCount::new();
    ec.wait_until(|| true);
}

#[test]
fn cancel_after_racing_update() {
    let ec = EventCount::new();
    let flag = AtomicBool::new(false);

    // The predicate turns true between the first check and the re-check;
    // the waiter must cancel instead of committing.
    let mut calls = 0;
    ec.wait_until(|| {
        calls += 1;
        if calls == 2 {
            flag.store(true, Ordering::SeqCst);
        }
        flag.load(Ordering::SeqCst)
    });

    assert_eq!(calls, 2);
}

#[test]
fn delayed_notify_wakes() {
    let ec = EventCount::new();
    let flag = AtomicBool::new(false);

    scope(|scope| {
        let ec = &ec;
        let flag = &flag;

        scope.spawn(move |_| {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
            ec.notify();
        });

        let start = Instant::now();
        ec.wait_until(|| flag.load(Ordering::SeqCst));

        assert!(flag.load(Ordering::SeqCst));
        // Generous bound; the point is that we did not spin until the
        // harness killed us.
        assert!(start.elapsed() < Duration::from_secs(10));
    })
    .unwrap();
}

#[test]
fn no_lost_wakeups() {
    #[cfg(miri)]
    const ROUNDS: usize = 50;
    #[cfg(not(miri))]
    const ROUNDS: usize = 10_000;

    let ec = EventCount::new();
    let published = AtomicUsize::new(0);

    scope(|scope| {
        let ec = &ec;
        let published = &published;

        scope.spawn(move |_| {
            for _ in 0..ROUNDS {
                published.fetch_add(1, Ordering::SeqCst);
                ec.notify();
            }
        });

        // The single waiter chases the counter. If a notification were
        // lost, one of these waits would hang.
        for target in 1..=ROUNDS {
            ec.wait_until(|| published.load(Ordering::SeqCst) >= target);
        }
    })
    .unwrap();
}
