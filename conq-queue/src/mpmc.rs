use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use conq_proxy::{Proxy, Reclaim};

/// Retirements on one collector before a quiescence round starts.
const DEFER_LIMIT: u32 = 64;

struct Node<T> {
    /// The next node in the queue.
    next: AtomicPtr<Node<T>>,

    /// Pool-link used by the proxy collector, so that `next` stays
    /// readable by racing consumers until the node is destroyed.
    defer_next: AtomicPtr<Node<T>>,

    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T> Reclaim for Node<T> {
    fn defer_link(&self) -> &AtomicPtr<Node<T>> {
        &self.defer_next
    }
}

impl<T> Node<T> {
    fn stub() -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            defer_next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }))
    }

    fn new(value: T) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            defer_next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }))
    }
}

/// An unbounded multi-producer multi-consumer queue.
///
/// The producer side is the same exchange-then-link protocol as
/// [`mpsc`](crate::mpsc); consumers race a CAS on `tail` to claim the next
/// node. A consumer that loses the race has already dereferenced a node
/// the winner is about to retire, so retired nodes go through an embedded
/// proxy collector and are only destroyed once every consumer pinned at
/// the time of retirement has finished its pop.
///
/// # Examples
///
/// ```
/// use conq_queue::MpmcQueue;
///
/// let q = MpmcQueue::new();
///
/// q.push('a');
/// q.push('b');
///
/// assert_eq!(q.pop(), Some('a'));
/// assert_eq!(q.pop(), Some('b'));
/// assert_eq!(q.pop(), None);
/// ```
pub struct MpmcQueue<T> {
    /// The most recently linked node. Producers exchange it.
    head: CachePadded<AtomicPtr<Node<T>>>,

    /// The oldest live node (initially the stub). Consumers race on it.
    tail: CachePadded<AtomicPtr<Node<T>>>,

    /// Deferred reclamation for nodes that racing consumers may still hold.
    proxy: Proxy<Node<T>>,

    /// Indicates that dropping an `MpmcQueue<T>` may drop values of type `T`.
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Creates a new unbounded queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::MpmcQueue;
    ///
    /// let q = MpmcQueue::<i32>::new();
    /// ```
    pub fn new() -> MpmcQueue<T> {
        let stub = Node::stub();
        MpmcQueue {
            head: CachePadded::new(AtomicPtr::new(stub)),
            tail: CachePadded::new(AtomicPtr::new(stub)),
            proxy: Proxy::new(DEFER_LIMIT),
            _marker: PhantomData,
        }
    }

    /// Pushes a value into the queue.
    ///
    /// Safe to call from any number of threads concurrently.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::MpmcQueue;
    ///
    /// let q = MpmcQueue::new();
    ///
    /// q.push(10);
    /// q.push(20);
    /// ```
    pub fn push(&self, value: T) {
        let n = Node::new(value);
        let prev = self.head.swap(n, Ordering::AcqRel);

        // Same preemption window as the MPSC queue: until this store lands,
        // consumers see the queue end at `prev`.
        unsafe {
            (*prev).next.store(n, Ordering::Release);
        }
    }

    /// Pops a value from the queue.
    ///
    /// Returns `None` if the queue appears empty (which, as with
    /// [`mpsc`](crate::mpsc), includes the window where a preempted
    /// producer has exchanged the head but not yet linked its node).
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::MpmcQueue;
    ///
    /// let q = MpmcQueue::new();
    ///
    /// q.push(10);
    /// assert_eq!(q.pop(), Some(10));
    /// assert_eq!(q.pop(), None);
    /// ```
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();

        // Pin for the whole operation: between loading `tail` and winning
        // the CAS we dereference nodes another consumer may retire.
        let c = self.proxy.acquire();

        let mut tail = self.tail.load(Ordering::Acquire);
        loop {
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if next.is_null() {
                self.proxy.release(c);
                return None;
            }

            // Read the payload before claiming the node. Losers of the CAS
            // drop the bitwise copy on the floor; only the winner turns it
            // into a value.
            let value = unsafe { (*next).value.get().read() };

            match self
                .tail
                .compare_exchange_weak(tail, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // The old tail may still be under a racing consumer's
                    // feet; hand it to the collector instead of freeing it.
                    unsafe {
                        self.proxy.retire(c, tail);
                    }
                    self.proxy.release(c);
                    return Some(unsafe { value.assume_init() });
                }
                Err(t) => {
                    tail = t;
                    backoff.spin();
                }
            }
        }
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        let tail = self.tail.load(Ordering::Relaxed);
        debug_assert_eq!(
            self.head.load(Ordering::Relaxed),
            tail,
            "dropping a non-empty queue",
        );

        unsafe {
            let mut n = (*tail).next.load(Ordering::Relaxed);
            drop(Box::from_raw(tail));
            while !n.is_null() {
                let next = (*n).next.load(Ordering::Relaxed);
                (*(*n).value.get()).as_mut_ptr().drop_in_place();
                drop(Box::from_raw(n));
                n = next;
            }
        }
        // Nodes already retired are destroyed by the proxy's own drop.
    }
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> MpmcQueue<T> {
        MpmcQueue::new()
    }
}

impl<T> fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("MpmcQueue { .. }")
    }
}
