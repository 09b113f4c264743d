use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use conq_proxy::seq::Proxy;
use crossbeam_utils::thread::scope;

const WRITERS: usize = 3;
const READERS: usize = 5;

#[cfg(miri)]
const ITERS: usize = 100;
#[cfg(not(miri))]
const ITERS: usize = 20_000;

#[test]
fn callbacks_fire_exactly_once() {
    let retired = AtomicUsize::new(0);
    let fired = Arc::new(AtomicUsize::new(0));
    let writers = AtomicUsize::new(WRITERS);

    {
        let proxy = Proxy::new();

        scope(|scope| {
            let proxy = &proxy;
            let retired = &retired;
            let fired = &fired;
            let writers = &writers;

            for _ in 0..READERS {
                scope.spawn(move |_| {
                    while writers.load(Ordering::Relaxed) != 0 {
                        let c = proxy.acquire();
                        thread::yield_now();
                        proxy.release(c);
                    }
                });
            }

            for _ in 0..WRITERS {
                scope.spawn(move |_| {
                    for i in 0..ITERS {
                        // Stand-in for an unlinked node: a boxed payload
                        // freed by the deferred closure.
                        let garbage = Box::new(i);
                        retired.fetch_add(1, Ordering::Relaxed);

                        let fired = Arc::clone(fired);
                        proxy.defer_recycle(move || {
                            drop(garbage);
                            fired.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                    writers.fetch_sub(1, Ordering::Relaxed);
                });
            }
        })
        .unwrap();

        // Dropping the proxy runs any callbacks still pending.
    }

    assert_eq!(
        fired.load(Ordering::Relaxed),
        retired.load(Ordering::Relaxed),
    );
}

#[test]
fn pinned_reader_defers_callback() {
    let proxy = Proxy::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let c = proxy.acquire();
    for _ in 0..2 {
        let fired = Arc::clone(&fired);
        proxy.defer_recycle(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Both retired epochs are still held down by the pinned reader.
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    proxy.release(c);
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}
