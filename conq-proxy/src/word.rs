//! Word-based proxy collector.
//!
//! A single atomic word, `current`, packs a collector index into its low
//! four bits and a reference count (in units of [`PIN`]) into the rest.
//! Pinning is one `fetch_add` on that word; the indexed collector is the
//! pin's home. A *quiescence* rotates `current` to the next collector and
//! transfers the packed count into the old collector's private counter,
//! together with an odd marker bit. The reader whose release drops that
//! counter to the marker alone finishes the round.
//!
//! Nodes are retired onto the pinned collector's deferred list. Completing
//! a quiescence does not destroy that list; it destroys the list detached
//! by the *previous* completion. A node retired during round `e` therefore
//! survives until the end of round `e + 1`, by which time every reader
//! that could have seen it has released.

use core::fmt;
use core::ptr;
use std::array;
use std::cell::UnsafeCell;
use std::sync::atomic::{self, AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

/// Low bits of `current` holding the collector index.
const INDEX: u32 = 0xf;
/// Marker bit set on a collector's count while its quiescence is pending.
const QUIESCE: u32 = 0x10;
/// One pinned reader, as counted in `current` and in collector counts.
const PIN: u32 = 0x20;

/// An object that can be handed to a [`Proxy`] for deferred destruction.
///
/// Retired objects are chained into per-collector lists through the link
/// returned by [`defer_link`], leaving any other links in the object (such
/// as a queue's `next` pointer) untouched.
///
/// # Safety
///
/// `defer_link` must return a link that the collector may use exclusively
/// from the moment the object is passed to [`Proxy::retire`] until the
/// object is destroyed. Objects must originate from `Box::into_raw`; the
/// collector destroys them with `Box::from_raw`.
///
/// [`defer_link`]: Reclaim::defer_link
pub unsafe trait Reclaim: Sized {
    /// Returns the intrusive link used to chain retired objects.
    fn defer_link(&self) -> &AtomicPtr<Self>;
}

/// One rotation slot of a [`Proxy`].
///
/// Holds the nodes retired while it was current and the count of readers
/// still pinned to it.
pub struct Collector<T: Reclaim> {
    /// Head of the deferred list.
    defer: AtomicPtr<T>,

    /// Number of nodes on the deferred list.
    defer_count: AtomicU32,

    /// Outstanding pins, in units of `PIN`, plus the `QUIESCE` marker.
    count: AtomicU32,
}

impl<T: Reclaim> Collector<T> {
    fn new() -> Collector<T> {
        Collector {
            defer: AtomicPtr::new(ptr::null_mut()),
            defer_count: AtomicU32::new(0),
            count: AtomicU32::new(0),
        }
    }
}

impl<T: Reclaim> Drop for Collector<T> {
    fn drop(&mut self) {
        unsafe {
            destroy(self.defer.load(Ordering::Relaxed));
        }
    }
}

impl<T: Reclaim> fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Collector { .. }")
    }
}

/// Destroys every node on a deferred list.
unsafe fn destroy<T: Reclaim>(mut n: *mut T) {
    while !n.is_null() {
        let next = (*n).defer_link().load(Ordering::Relaxed);
        drop(Box::from_raw(n));
        n = next;
    }
}

/// A word-based proxy collector with `K` rotation slots.
///
/// `K` must be a power of two between 2 and 16; four slots are plenty for
/// queues, where pins are short. The proxy is driven entirely by its users:
/// readers pin with [`acquire`] and unpin with [`release`], writers retire
/// garbage with [`retire`], and anyone may nudge a quiescence round with
/// [`collect`]. Retiring more than half of `defer_limit` nodes onto one
/// collector starts a round automatically.
///
/// [`acquire`]: Proxy::acquire
/// [`release`]: Proxy::release
/// [`retire`]: Proxy::retire
/// [`collect`]: Proxy::collect
pub struct Proxy<T: Reclaim, const K: usize = 4> {
    /// Packed `{pin count, collector index}` word.
    current: CachePadded<AtomicU32>,

    /// Latch serializing quiescence rounds.
    quiesce: AtomicBool,

    /// List detached by the previous quiescence completion, destroyed by
    /// the next one. Guarded by the `quiesce` latch.
    defer: UnsafeCell<*mut T>,

    defer_limit: u32,

    collectors: [Collector<T>; K],
}

unsafe impl<T: Reclaim + Send, const K: usize> Send for Proxy<T, K> {}
unsafe impl<T: Reclaim + Send, const K: usize> Sync for Proxy<T, K> {}

impl<T: Reclaim, const K: usize> Proxy<T, K> {
    /// Creates a proxy that starts a quiescence round once a collector has
    /// accumulated `defer_limit / 2` retired nodes.
    ///
    /// # Panics
    ///
    /// Panics if `K` is not a power of two in `2..=16`, or if
    /// `defer_limit < 2`.
    pub fn new(defer_limit: u32) -> Proxy<T, K> {
        assert!(
            (2..=16).contains(&K) && K.is_power_of_two(),
            "number of collectors must be a power of two between 2 and 16",
        );
        assert!(defer_limit >= 2, "defer limit must be at least 2");

        Proxy {
            current: CachePadded::new(AtomicU32::new(0)),
            quiesce: AtomicBool::new(false),
            defer: UnsafeCell::new(ptr::null_mut()),
            defer_limit,
            collectors: array::from_fn(|_| Collector::new()),
        }
    }

    /// Pins the current collector and returns it.
    ///
    /// The pin must be dropped with [`release`] on the same collector.
    ///
    /// [`release`]: Proxy::release
    pub fn acquire(&self) -> &Collector<T> {
        // Bump the packed count and read the index in one operation.
        let current = self.current.fetch_add(PIN, Ordering::Acquire);
        &self.collectors[(current & INDEX) as usize]
    }

    /// Drops a pin obtained from [`acquire`].
    ///
    /// The caller must pass the same collector the pin was taken on, and
    /// must not release a pin twice.
    ///
    /// [`acquire`]: Proxy::acquire
    pub fn release(&self, c: &Collector<T>) {
        let count = c.count.fetch_sub(PIN, Ordering::Release);

        // One pin left on a quiesced collector: that pin was ours.
        if (count & !INDEX) == QUIESCE + PIN {
            unsafe {
                self.quiesce_complete(c);
            }
        }
    }

    /// Exchanges a pin on a quiesced collector for a fresh one.
    ///
    /// Long-running readers call this between traversals so that they do
    /// not hold back the round that is waiting on their collector. Returns
    /// the collector the caller is now pinned to.
    pub fn sync<'a>(&'a self, c: &'a Collector<T>) -> &'a Collector<T> {
        if (c.count.load(Ordering::Relaxed) & QUIESCE) != 0 {
            self.release(c);
            return self.acquire();
        }
        c
    }

    /// Starts a quiescence round, unless one is already running.
    pub fn collect(&self) {
        self.quiesce_begin();
    }

    /// Retires a node for deferred destruction.
    ///
    /// The node is chained onto the deferred list of `c`, which the caller
    /// must currently hold a pin on. A null `node` is ignored.
    ///
    /// # Safety
    ///
    /// `node` must have been obtained from `Box::into_raw`, must be
    /// unreachable to any thread that is not currently pinned, and must
    /// not be retired twice.
    pub unsafe fn retire(&self, c: &Collector<T>, node: *mut T) {
        if node.is_null() {
            return;
        }

        // Push onto the deferred list. The list is only walked after the
        // round completes, so a relaxed link store is enough.
        let mut head = c.defer.load(Ordering::Relaxed);
        loop {
            (*node).defer_link().store(head, Ordering::Relaxed);
            match c
                .defer
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(h) => head = h,
            }
        }

        let count = c.defer_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.defer_limit / 2 {
            self.quiesce_begin();
        }
    }

    /// Rotates `current` to the next collector and transfers the packed
    /// pin count into the old one, marked with `QUIESCE`.
    fn quiesce_begin(&self) {
        if self.quiesce.swap(true, Ordering::Acquire) {
            // A round is already in flight.
            return;
        }

        let old = self.current.load(Ordering::Relaxed) & INDEX;
        let old = self
            .current
            .swap((old + 1) & (K as u32 - 1), Ordering::AcqRel);
        let c = &self.collectors[(old & INDEX) as usize];

        // Pins taken on the old collector, still packed in `current`.
        let refs = old & !INDEX;
        debug_assert_eq!(refs & QUIESCE, 0);

        // Fold them into the collector's own count together with the odd
        // marker. Releases may already have driven the count negative; the
        // sum lands on exactly QUIESCE once every pin is accounted for.
        if c.count
            .fetch_add(refs.wrapping_add(QUIESCE), Ordering::Release)
            == refs.wrapping_neg()
        {
            unsafe {
                self.quiesce_complete(c);
            }
        }
    }

    /// Finishes a round: detaches the quiesced collector's deferred list,
    /// destroys the list detached by the previous round, and releases the
    /// latch.
    unsafe fn quiesce_complete(&self, c: &Collector<T>) {
        atomic::fence(Ordering::Acquire);

        // Keep this round's garbage for one more round; destroy the last
        // round's.
        let nodes = *self.defer.get();
        *self.defer.get() = c.defer.swap(ptr::null_mut(), Ordering::Relaxed);

        debug_assert_eq!(c.count.load(Ordering::Relaxed), QUIESCE);
        c.count.store(0, Ordering::Relaxed);
        c.defer_count.store(0, Ordering::Relaxed);

        self.quiesce.store(false, Ordering::Release);

        destroy(nodes);
    }
}

impl<T: Reclaim, const K: usize> Drop for Proxy<T, K> {
    fn drop(&mut self) {
        unsafe {
            destroy(*self.defer.get());
        }
        // Collector lists are destroyed by each `Collector`'s own drop.
    }
}

impl<T: Reclaim, const K: usize> fmt::Debug for Proxy<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Proxy { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        defer_next: AtomicPtr<Node>,
    }

    unsafe impl Reclaim for Node {
        fn defer_link(&self) -> &AtomicPtr<Node> {
            &self.defer_next
        }
    }

    fn node() -> *mut Node {
        Box::into_raw(Box::new(Node {
            defer_next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    #[test]
    fn pin_unpin() {
        let proxy = Proxy::<Node>::new(64);
        let c = proxy.acquire();
        proxy.release(c);
    }

    #[test]
    fn retire_without_readers() {
        let proxy = Proxy::<Node>::new(64);
        for _ in 0..100 {
            let c = proxy.acquire();
            unsafe {
                proxy.retire(c, node());
            }
            proxy.release(c);
        }
        // Flush both epochs; remaining nodes go down with the proxy.
        proxy.collect();
        proxy.collect();
    }

    #[test]
    fn sync_repins_after_rotation() {
        let proxy = Proxy::<Node>::new(64);
        let c = proxy.acquire();
        proxy.collect();
        let c = proxy.sync(c);
        proxy.release(c);
    }
}
