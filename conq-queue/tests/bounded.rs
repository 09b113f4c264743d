use std::thread;
use std::time::Duration;

use conq_queue::{BoundedQueue, PushError};
use crossbeam_utils::thread::scope;

#[test]
fn smoke() {
    let q = BoundedQueue::new(2);

    q.push(7).unwrap();
    assert_eq!(q.pop(), Some(7));

    q.push(8).unwrap();
    assert_eq!(q.pop(), Some(8));
    assert_eq!(q.pop(), None);
}

#[test]
fn full_returns_value() {
    let q = BoundedQueue::new(2);

    assert_eq!(q.push(1), Ok(()));
    assert_eq!(q.push(2), Ok(()));
    assert_eq!(q.push(3), Err(PushError(3)));

    assert_eq!(q.pop(), Some(1));
    assert_eq!(q.push(3), Ok(()));
}

#[test]
#[should_panic(expected = "capacity must be a power of two")]
fn bad_capacity() {
    let _ = BoundedQueue::<i32>::new(12);
}

#[test]
#[should_panic(expected = "capacity must be a power of two")]
fn capacity_one() {
    let _ = BoundedQueue::<i32>::new(1);
}

#[test]
fn len_empty_full() {
    let q = BoundedQueue::new(2);

    assert_eq!(q.len(), 0);
    assert!(q.is_empty());
    assert!(!q.is_full());

    q.push(()).unwrap();

    assert_eq!(q.len(), 1);
    assert!(!q.is_empty());
    assert!(!q.is_full());

    q.push(()).unwrap();

    assert_eq!(q.len(), 2);
    assert!(!q.is_empty());
    assert!(q.is_full());

    q.pop().unwrap();

    assert_eq!(q.len(), 1);
}

#[test]
fn wraparound() {
    let q = BoundedQueue::new(4);

    // Push the positions well past several laps of the ring.
    for i in 0..100 {
        q.push(i).unwrap();
        assert_eq!(q.pop(), Some(i));
    }
    assert!(q.is_empty());
}

#[test]
fn producer_observes_full() {
    let q = BoundedQueue::new(2);

    scope(|scope| {
        let q = &q;

        scope.spawn(move |_| {
            // Give the producer time to run into the capacity limit.
            thread::sleep(Duration::from_millis(50));

            for i in 0..10 {
                loop {
                    if let Some(v) = q.pop() {
                        assert_eq!(v, i);
                        break;
                    }
                    thread::yield_now();
                }
            }
        });

        let mut rejected = 0;
        for mut i in 0..10 {
            loop {
                match q.push(i) {
                    Ok(()) => break,
                    Err(PushError(v)) => {
                        rejected += 1;
                        i = v;
                        thread::yield_now();
                    }
                }
            }
        }

        // With two slots and a delayed consumer, at least one push must
        // have found the queue full.
        assert!(rejected > 0);
    })
    .unwrap();
}

#[test]
fn stress_mpmc() {
    #[cfg(miri)]
    const COUNT: usize = 100;
    #[cfg(not(miri))]
    const COUNT: usize = 25_000;
    const THREADS: usize = 2;

    let q = BoundedQueue::new(8);
    let mut seen = Vec::new();
    seen.resize_with(THREADS * COUNT, Default::default);
    let seen: &[std::sync::atomic::AtomicUsize] = &seen;

    scope(|scope| {
        let q = &q;

        for t in 0..THREADS {
            scope.spawn(move |_| {
                for i in 0..COUNT {
                    let mut v = t * COUNT + i;
                    loop {
                        match q.push(v) {
                            Ok(()) => break,
                            Err(PushError(back)) => {
                                v = back;
                                thread::yield_now();
                            }
                        }
                    }
                }
            });
        }

        for _ in 0..THREADS {
            scope.spawn(move |_| {
                for _ in 0..COUNT {
                    let v = loop {
                        match q.pop() {
                            Some(v) => break v,
                            None => thread::yield_now(),
                        }
                    };
                    seen[v].fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            });
        }
    })
    .unwrap();

    // Conservation: every value was popped exactly once.
    for (i, s) in seen.iter().enumerate() {
        assert_eq!(s.load(std::sync::atomic::Ordering::Relaxed), 1, "value {}", i);
    }
    assert!(q.is_empty());
}

#[test]
fn drops_remaining_values() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    {
        let q = BoundedQueue::new(8);
        for _ in 0..6 {
            q.push(Counted).unwrap();
        }
        for _ in 0..2 {
            drop(q.pop());
        }
    }

    assert_eq!(DROPS.load(Ordering::SeqCst), 6);
}
