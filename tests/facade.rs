//! Checks that the facade re-exports compose.

use conq::queue::{spsc, BoundedQueue, MpmcQueue};
use conq::sync::EventCount;

#[test]
fn uses_queue() {
    let q = MpmcQueue::new();
    q.push(1);
    assert_eq!(q.pop(), Some(1));

    let b = BoundedQueue::new(2);
    b.push(2).unwrap();
    assert_eq!(b.pop(), Some(2));

    let (p, c) = spsc::new();
    p.push(3);
    assert_eq!(c.pop(), Some(3));
}

#[test]
fn uses_sync() {
    let ec = EventCount::new();
    ec.wait_until(|| true);
    ec.notify();
}

#[test]
fn uses_proxy() {
    let proxy = conq::proxy::seq::Proxy::new();
    let c = proxy.acquire();
    proxy.release(c);
}
