//! Sequence-based proxy collector.
//!
//! Collectors form a linked chain. The chain tail is a double-word
//! `(sequence, collector)` pair in a single `AtomicU128`: readers pin by
//! CAS-bumping the sequence, so the number of pins taken on the current
//! tail lives *outside* the collector until it is retired from the tail
//! position. Retiring folds the external sequence into the collector's own
//! count, clears its GUARD bit, and attaches a deferred closure to the new
//! tail; the closure runs when the old collector drains.
//!
//! A collector's count is partitioned into a GUARD bit (it is still the
//! tail) and REFERENCE units (pins plus one link reference held by its
//! predecessor). The GUARD bit keeps the count odd, so a plain release can
//! never be mistaken for the drop-to-zero of a retired collector. Drained
//! collectors are not freed; the `free_head`/`free_tail` cursors mark the
//! drained prefix of the chain itself as reusable, and the full-width
//! sequences on both cursors make the pop/advance CASes ABA-safe.

use core::fmt;
use core::ptr;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU128;

/// Bit marking a collector as the current tail.
const GUARD: i64 = 1;
/// One reader pin (or the predecessor's link reference).
const REFERENCE: i64 = 2;

type Deferred = Box<dyn FnOnce() + Send>;

/// Packs a collector pointer and a sequence into one 128-bit word.
fn pack(c: *mut Collector, seq: i64) -> u128 {
    ((seq as u64 as u128) << 64) | (c as usize as u128)
}

fn unpack_ptr(word: u128) -> *mut Collector {
    word as u64 as usize as *mut Collector
}

fn unpack_seq(word: u128) -> i64 {
    (word >> 64) as u64 as i64
}

/// One epoch of a sequence-based [`Proxy`].
pub struct Collector {
    /// GUARD bit plus REFERENCE units, minus releases already performed.
    count: AtomicI64,

    /// Successor in the chain.
    next: AtomicPtr<Collector>,

    /// Closure to run once the *predecessor* drains. Written while the
    /// collector is being linked in, taken exactly once by the drainer.
    defer: UnsafeCell<Option<Deferred>>,
}

unsafe impl Send for Collector {}
unsafe impl Sync for Collector {}

impl Collector {
    fn with_count(count: i64) -> Collector {
        Collector {
            count: AtomicI64::new(count),
            next: AtomicPtr::new(ptr::null_mut()),
            defer: UnsafeCell::new(None),
        }
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Collector { .. }")
    }
}

/// A proxy collector with an unbounded, recycled chain of epochs.
///
/// Unlike [`word::Proxy`](crate::word::Proxy), retirement takes an
/// arbitrary closure rather than an intrusive list node, and the set of
/// epochs grows on demand instead of rotating through a fixed array.
/// Collectors drained of readers are recycled through a free list, so the
/// chain stops growing as soon as retirement slows down to the rate at
/// which readers release.
pub struct Proxy {
    /// `(sequence, collector)` tail of the chain. The sequence counts
    /// pins taken on the tail collector, in REFERENCE units.
    tail: CachePadded<AtomicU128>,

    /// Oldest reusable collector.
    free_head: AtomicU128,

    /// One past the newest reusable collector; collectors drain in chain
    /// order, so every drain advances this cursor by exactly one.
    free_tail: AtomicU128,
}

unsafe impl Send for Proxy {}
unsafe impl Sync for Proxy {}

impl Proxy {
    /// Creates a proxy with a single, empty epoch.
    pub fn new() -> Proxy {
        let c = Box::into_raw(Box::new(Collector::with_count(GUARD + REFERENCE)));
        let word = pack(c, 0);

        Proxy {
            tail: CachePadded::new(AtomicU128::new(word)),
            free_head: AtomicU128::new(word),
            free_tail: AtomicU128::new(word),
        }
    }

    /// Pins the current tail collector and returns it.
    pub fn acquire(&self) -> &Collector {
        let mut old = self.tail.load(Ordering::Relaxed);
        loop {
            let new = pack(unpack_ptr(old), unpack_seq(old) + REFERENCE);
            match self
                .tail
                .compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return unsafe { &*unpack_ptr(old) },
                Err(word) => old = word,
            }
        }
    }

    /// Drops a pin obtained from [`acquire`].
    ///
    /// The caller must pass the collector the pin was taken on, and must
    /// not release a pin twice.
    ///
    /// [`acquire`]: Proxy::acquire
    pub fn release(&self, c: &Collector) {
        self.release_adjust(c as *const Collector as *mut Collector, 0);
    }

    /// Retires the current epoch, registering `f` to run once every reader
    /// pinned to it has released.
    ///
    /// Callers unlink whatever `f` is going to free *before* calling this,
    /// so that readers pinning later epochs cannot reach it.
    pub fn defer_recycle<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let c = self.alloc_collector();
        unsafe {
            // Two REFERENCEs: one for the link held by the collector we are
            // about to retire, one folded away when `c` itself is retired.
            (*c).count.store(GUARD + 2 * REFERENCE, Ordering::Relaxed);
            (*c).next.store(ptr::null_mut(), Ordering::Relaxed);
            *(*c).defer.get() = Some(Box::new(f));
        }

        // Swing the tail to the fresh collector, zeroing its sequence.
        let new_tail = pack(c, 0);
        let mut old = self.tail.load(Ordering::Acquire);
        while let Err(word) =
            self.tail
                .compare_exchange_weak(old, new_tail, Ordering::AcqRel, Ordering::Acquire)
        {
            old = word;
        }

        let old_c = unpack_ptr(old);
        // The old collector still carries its GUARD bit, so it cannot drain
        // before this link is in place.
        unsafe {
            (*old_c).next.store(c, Ordering::Relaxed);
        }

        // Clear the GUARD and fold the external pin count into the
        // collector's own count.
        self.release_adjust(old_c, unpack_seq(old) - GUARD);
    }

    /// Pops a drained collector off the free list, or allocates one.
    fn alloc_collector(&self) -> *mut Collector {
        let mut old = self.free_head.load(Ordering::Acquire);
        loop {
            if unpack_ptr(old) == unpack_ptr(self.free_tail.load(Ordering::Relaxed)) {
                return Box::into_raw(Box::new(Collector::with_count(0)));
            }

            let next = unsafe { (*unpack_ptr(old)).next.load(Ordering::Relaxed) };
            let new = pack(next, unpack_seq(old) + GUARD);
            match self.free_head.compare_exchange(
                old,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return unpack_ptr(old),
                Err(word) => old = word,
            }
        }
    }

    /// Subtracts `REFERENCE - adjust` from a collector's count and, on
    /// drop-to-zero, reaps it and cascades down the chain.
    ///
    /// The drop-to-zero signature is "previous count equals the amount
    /// being subtracted". While a collector holds its GUARD bit its count
    /// is odd and a plain release (even subtrahend) can never match.
    fn release_adjust(&self, c: *mut Collector, adjust: i64) {
        let mut current = c;
        let mut adjusted = REFERENCE - adjust;

        unsafe {
            loop {
                // Skip the RMW when we hold the only remaining reference.
                if (*current).count.load(Ordering::Acquire) != adjusted
                    && (*current).count.fetch_sub(adjusted, Ordering::AcqRel) != adjusted
                {
                    break;
                }

                // `current` has drained. Collectors drain strictly in chain
                // order, so it sits exactly at `free_tail`; advance the
                // cursor to hand it to the free list.
                let next = (*current).next.load(Ordering::Relaxed);

                let mut free_tail = self.free_tail.load(Ordering::Acquire);
                loop {
                    let ft_next = (*unpack_ptr(free_tail)).next.load(Ordering::Relaxed);
                    let new = pack(ft_next, unpack_seq(free_tail) + GUARD);
                    match self.free_tail.compare_exchange_weak(
                        free_tail,
                        new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(word) => free_tail = word,
                    }
                }

                // Run the closure registered when `current` was retired
                // from the tail; it lives on the successor.
                current = next;
                if let Some(f) = (*(*current).defer.get()).take() {
                    f();
                }

                // Release the link reference we held on the successor.
                adjusted = REFERENCE;
            }
        }
    }
}

impl Default for Proxy {
    fn default() -> Proxy {
        Proxy::new()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        // The chain from `free_head` reaches every collector, drained or
        // live. Closures that never got to run still own garbage; run them
        // before freeing the chain.
        unsafe {
            let mut c = unpack_ptr(self.free_head.load(Ordering::Relaxed));
            while !c.is_null() {
                let next = (*c).next.load(Ordering::Relaxed);
                if let Some(f) = (*(*c).defer.get()).take() {
                    f();
                }
                drop(Box::from_raw(c));
                c = next;
            }
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Proxy { .. }")
    }
}
