//! An unbounded multi-producer single-consumer queue.
//!
//! Producers serialize on a single atomic exchange of the `head` pointer
//! and then link their node in behind it; the consumer walks `tail`
//! forward on its own. A permanently present stub node keeps `tail`
//! non-null, so neither path branches on the empty queue.
//!
//! # Examples
//!
//! ```
//! use conq_queue::mpsc;
//!
//! let (p, c) = mpsc::new();
//!
//! p.push(1);
//! p.clone().push(2);
//!
//! assert_eq!(c.pop(), Some(1));
//! assert_eq!(c.pop(), Some(2));
//! assert_eq!(c.pop(), None);
//! ```

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Node<T> {
    fn stub() -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }))
    }

    fn new(value: T) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }))
    }
}

/// The inner representation of the queue.
struct Inner<T> {
    /// The most recently linked node. Producers exchange it.
    head: CachePadded<AtomicPtr<Node<T>>>,

    /// The oldest live node (initially the stub). Consumer-owned.
    tail: CachePadded<AtomicPtr<Node<T>>>,

    /// Indicates that dropping an `Inner<T>` may drop values of type `T`.
    _marker: PhantomData<T>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let tail = self.tail.load(Ordering::Relaxed);
        debug_assert_eq!(
            self.head.load(Ordering::Relaxed),
            tail,
            "dropping a non-empty queue",
        );

        unsafe {
            // The node at `tail` has had its value consumed (or is the
            // stub); everything after it still holds a value.
            let mut n = (*tail).next.load(Ordering::Relaxed);
            drop(Box::from_raw(tail));
            while !n.is_null() {
                let next = (*n).next.load(Ordering::Relaxed);
                (*(*n).value.get()).as_mut_ptr().drop_in_place();
                drop(Box::from_raw(n));
                n = next;
            }
        }
    }
}

/// Creates an unbounded multi-producer single-consumer queue.
///
/// Returns the producer and the consumer side of the queue. The producer
/// can be cloned and shared freely; the consumer is unique, which is what
/// keeps `tail` single-owner.
///
/// # Examples
///
/// ```
/// use conq_queue::mpsc;
///
/// let (p, c) = mpsc::new::<i32>();
/// ```
pub fn new<T>() -> (Producer<T>, Consumer<T>) {
    let stub = Node::stub();

    let inner = Arc::new(Inner {
        head: CachePadded::new(AtomicPtr::new(stub)),
        tail: CachePadded::new(AtomicPtr::new(stub)),
        _marker: PhantomData,
    });

    let p = Producer {
        inner: inner.clone(),
    };
    let c = Consumer { inner };

    (p, c)
}

/// The producer side of an unbounded multi-producer single-consumer queue.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

unsafe impl<T: Send> Send for Producer<T> {}
unsafe impl<T: Send> Sync for Producer<T> {}

impl<T> Producer<T> {
    /// Pushes a value into the queue.
    ///
    /// Safe to call from any number of threads concurrently. One atomic
    /// exchange; wait-free apart from the allocation.
    pub fn push(&self, value: T) {
        let n = Node::new(value);

        // The exchange serializes producers: each one links in behind the
        // previous head it received.
        let prev = self.inner.head.swap(n, Ordering::AcqRel);

        // A producer preempted here leaves `prev.next` null until it
        // resumes, making the queue look empty to the consumer even though
        // this node and everything exchanged in after it exist.
        unsafe {
            (*prev).next.store(n, Ordering::Release);
        }
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Producer<T> {
        Producer {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Producer { .. }")
    }
}

/// The consumer side of an unbounded multi-producer single-consumer queue.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

unsafe impl<T: Send> Send for Consumer<T> {}

impl<T> Consumer<T> {
    /// Pops a value from the queue.
    ///
    /// Returns `None` if the queue appears empty. Wait-free.
    ///
    /// A `None` is not proof of emptiness: a producer that has exchanged
    /// the head but not yet stored the link makes the queue look empty
    /// until it resumes. Polling consumers should retry with backoff (or
    /// block on an event-count) rather than treat one `None` as final.
    pub fn pop(&self) -> Option<T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };

        if next.is_null() {
            return None;
        }

        let value = unsafe { (*next).value.get().read().assume_init() };
        self.inner.tail.store(next, Ordering::Relaxed);

        // The consumed node becomes the new stub; the old one is ours to
        // free, since no producer can reach a node behind `tail`.
        unsafe {
            drop(Box::from_raw(tail));
        }

        Some(value)
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Consumer { .. }")
    }
}
