//! An unbounded single-producer single-consumer queue.
//!
//! The queue is a singly linked list. The producer owns the write end
//! (`head`) and a private cache of retired nodes it allocates from; the
//! consumer owns the read end (`tail`). A node the consumer moves past is
//! not freed: it sits between the cache pointer `first` and the consumer's
//! `tail`, waiting to be reused by a later push. The heap is touched only
//! when the cache is empty.
//!
//! # Examples
//!
//! ```
//! use conq_queue::spsc;
//!
//! let (p, c) = spsc::new();
//!
//! p.push(1);
//! p.push(2);
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

/// A node in the linked list.
///
/// The payload is `MaybeUninit` because a node outlives its value: the
/// value is moved out on pop while the node itself goes back to the cache.
struct Node<T> {
    /// The next node in the queue.
    next: AtomicPtr<Node<T>>,

    /// The payload.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Node<T> {
    fn empty() -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }))
    }
}

/// Pointers owned by the producer, kept on their own cache line.
struct Producers<T> {
    /// The most recently pushed node.
    head: AtomicPtr<Node<T>>,

    /// The front of the node cache.
    first: AtomicPtr<Node<T>>,

    /// A snapshot of the consumer's `tail`. Nodes in `first..tail_copy`
    /// are certainly reusable; refreshing the snapshot may find more.
    tail_copy: AtomicPtr<Node<T>>,
}

/// The inner representation of the queue.
struct Inner<T> {
    /// Producer-owned pointers.
    prod: CachePadded<Producers<T>>,

    /// The oldest live node, owned by the consumer.
    tail: CachePadded<AtomicPtr<Node<T>>>,

    /// Indicates that dropping an `Inner<T>` may drop values of type `T`.
    _marker: PhantomData<T>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        unsafe {
            // Drop the values that were pushed but never popped. They live
            // strictly after `tail`.
            let tail = self.tail.load(Ordering::Relaxed);
            let mut n = (*tail).next.load(Ordering::Relaxed);
            while !n.is_null() {
                (*(*n).value.get()).as_mut_ptr().drop_in_place();
                n = (*n).next.load(Ordering::Relaxed);
            }

            // Free every node. The list runs from the cache front through
            // `tail` to `head`, all linked by `next`.
            let mut n = self.prod.first.load(Ordering::Relaxed);
            while !n.is_null() {
                let next = (*n).next.load(Ordering::Relaxed);
                drop(Box::from_raw(n));
                n = next;
            }
        }
    }
}

/// Creates an unbounded single-producer single-consumer queue.
///
/// Returns the producer and the consumer side of the queue. The handles
/// are not cloneable: there is exactly one of each, which is what makes
/// the queue's wait-free paths sound.
///
/// # Examples
///
/// ```
/// use conq_queue::spsc;
///
/// let (p, c) = spsc::new::<i32>();
/// ```
pub fn new<T>() -> (Producer<T>, Consumer<T>) {
    let stub = Node::empty();

    let inner = Arc::new(Inner {
        prod: CachePadded::new(Producers {
            head: AtomicPtr::new(stub),
            first: AtomicPtr::new(stub),
            tail_copy: AtomicPtr::new(stub),
        }),
        tail: CachePadded::new(AtomicPtr::new(stub)),
        _marker: PhantomData,
    });

    let p = Producer {
        inner: inner.clone(),
    };
    let c = Consumer { inner };

    (p, c)
}

/// The producer side of an unbounded single-producer single-consumer queue.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

unsafe impl<T: Send> Send for Producer<T> {}

impl<T> Producer<T> {
    /// Pushes a value into the queue.
    ///
    /// Wait-free while the node cache has a reusable node; falls back to a
    /// heap allocation otherwise.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::spsc;
    ///
    /// let (p, c) = spsc::new();
    /// p.push(10);
    /// assert_eq!(c.pop(), Some(10));
    /// ```
    pub fn push(&self, value: T) {
        let n = self.alloc_node();

        unsafe {
            (*n).next.store(ptr::null_mut(), Ordering::Relaxed);
            (*n).value.get().write(MaybeUninit::new(value));
        }

        // Publish the node. This release store synchronizes with the
        // consumer's acquire load of `head.next` in `pop`, carrying the
        // value write with it.
        let head = self.inner.prod.head.load(Ordering::Relaxed);
        unsafe {
            (*head).next.store(n, Ordering::Release);
        }
        self.inner.prod.head.store(n, Ordering::Relaxed);
    }

    /// Takes a node from the cache, or allocates one if the cache is empty.
    fn alloc_node(&self) -> *mut Node<T> {
        let prod = &self.inner.prod;

        let first = prod.first.load(Ordering::Relaxed);
        let mut tail = prod.tail_copy.load(Ordering::Relaxed);

        if first == tail {
            // The snapshot is used up; catch up with the consumer. The
            // acquire load synchronizes with the release store of `tail`
            // in `pop`, which is what licenses reusing the nodes behind it.
            tail = self.inner.tail.load(Ordering::Acquire);
            prod.tail_copy.store(tail, Ordering::Relaxed);
        }

        if first != tail {
            let next = unsafe { (*first).next.load(Ordering::Relaxed) };
            prod.first.store(next, Ordering::Relaxed);
            return first;
        }

        Node::empty()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Producer { .. }")
    }
}

/// The consumer side of an unbounded single-producer single-consumer queue.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

unsafe impl<T: Send> Send for Consumer<T> {}

impl<T> Consumer<T> {
    /// Pops a value from the queue.
    ///
    /// Returns `None` if the queue is empty. Wait-free.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::spsc;
    ///
    /// let (p, c) = spsc::new();
    /// p.push(10);
    ///
    /// assert_eq!(c.pop(), Some(10));
    /// assert_eq!(c.pop(), None);
    /// ```
    pub fn pop(&self) -> Option<T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };

        if next.is_null() {
            return None;
        }

        let value = unsafe { (*next).value.get().read().assume_init() };

        // Retire the old tail into the producer's reuse window. The value
        // was read out above, so the producer is free to overwrite the node
        // once it observes this store.
        self.inner.tail.store(next, Ordering::Release);

        Some(value)
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Consumer { .. }")
    }
}
