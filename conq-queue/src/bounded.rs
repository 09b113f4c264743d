use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::err::PushError;

/// A cell in the ring.
///
/// The sequence number encodes the cell's state relative to the position
/// counters: `sequence == pos` means writable for the enqueue ticket `pos`,
/// `sequence == pos + 1` means readable for the dequeue ticket `pos`.
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded multi-producer multi-consumer queue.
///
/// The queue is a fixed ring of sequence-numbered cells. An operation takes
/// a ticket from its position counter, finds its cell by masking, and reads
/// the cell's sequence to learn whether the cell is ready for it; the
/// operation commits by CAS-ing the position counter and then publishes the
/// cell with a release store of the next sequence. Pushing into a full
/// queue fails rather than blocks, handing the value back.
///
/// # Examples
///
/// ```
/// use conq_queue::{BoundedQueue, PushError};
///
/// let q = BoundedQueue::new(2);
///
/// assert_eq!(q.push('a'), Ok(()));
/// assert_eq!(q.push('b'), Ok(()));
/// assert_eq!(q.push('c'), Err(PushError('c')));
/// assert_eq!(q.pop(), Some('a'));
/// ```
pub struct BoundedQueue<T> {
    /// Ticket counter for pushes.
    enqueue_pos: CachePadded<AtomicUsize>,

    /// Ticket counter for pops.
    dequeue_pos: CachePadded<AtomicUsize>,

    buffer: Box<[Slot<T>]>,

    /// `capacity - 1`; the capacity is a power of two.
    mask: usize,
}

unsafe impl<T: Send> Sync for BoundedQueue<T> {}
unsafe impl<T: Send> Send for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a new bounded queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is not a power of two of at least 2; the
    /// ring decodes cell indices by masking.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::BoundedQueue;
    ///
    /// let q = BoundedQueue::<i32>::new(128);
    /// ```
    pub fn new(cap: usize) -> BoundedQueue<T> {
        assert!(
            cap >= 2 && cap.is_power_of_two(),
            "capacity must be a power of two, at least 2",
        );

        let buffer: Box<[Slot<T>]> = (0..cap)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        BoundedQueue {
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            mask: cap - 1,
        }
    }

    /// Attempts to push a value into the queue.
    ///
    /// If the queue is full, the value is handed back as an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::{BoundedQueue, PushError};
    ///
    /// let q = BoundedQueue::new(2);
    ///
    /// assert_eq!(q.push(10), Ok(()));
    /// assert_eq!(q.push(20), Ok(()));
    /// assert_eq!(q.push(30), Err(PushError(30)));
    /// ```
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let backoff = Backoff::new();
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos) as isize;

            if dif == 0 {
                // The cell is writable for this ticket; claim the ticket.
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            slot.value.get().write(MaybeUninit::new(value));
                        }
                        // Publish to the consumer holding this ticket.
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(p) => {
                        pos = p;
                        backoff.spin();
                    }
                }
            } else if dif < 0 {
                // The cell still holds a value a full lap behind us.
                return Err(PushError(value));
            } else {
                // Another producer claimed this ticket; take a fresh one.
                pos = self.enqueue_pos.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Attempts to pop a value from the queue.
    ///
    /// If the queue is empty, `None` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::BoundedQueue;
    ///
    /// let q = BoundedQueue::new(2);
    /// assert_eq!(q.push(10), Ok(()));
    ///
    /// assert_eq!(q.pop(), Some(10));
    /// assert_eq!(q.pop(), None);
    /// ```
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if dif == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { slot.value.get().read().assume_init() };
                        // Mark the cell writable for the producer one lap
                        // ahead.
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(p) => {
                        pos = p;
                        backoff.spin();
                    }
                }
            } else if dif < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Returns the capacity of the queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::BoundedQueue;
    ///
    /// let q = BoundedQueue::<i32>::new(128);
    ///
    /// assert_eq!(q.capacity(), 128);
    /// ```
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Returns the number of values in the queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::BoundedQueue;
    ///
    /// let q = BoundedQueue::new(4);
    /// assert_eq!(q.len(), 0);
    ///
    /// q.push(10).unwrap();
    /// assert_eq!(q.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        loop {
            // Load the dequeue ticket, then the enqueue ticket; retry if a
            // pop slipped in between and made the pair inconsistent.
            let deq = self.dequeue_pos.load(Ordering::SeqCst);
            let enq = self.enqueue_pos.load(Ordering::SeqCst);

            if self.dequeue_pos.load(Ordering::SeqCst) == deq {
                return enq.wrapping_sub(deq);
            }
        }
    }

    /// Returns `true` if the queue is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::BoundedQueue;
    ///
    /// let q = BoundedQueue::new(4);
    ///
    /// assert!(q.is_empty());
    /// q.push(1).unwrap();
    /// assert!(!q.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue is full.
    ///
    /// # Examples
    ///
    /// ```
    /// use conq_queue::BoundedQueue;
    ///
    /// let q = BoundedQueue::new(2);
    ///
    /// assert!(!q.is_full());
    /// q.push(1).unwrap();
    /// q.push(2).unwrap();
    /// assert!(q.is_full());
    /// ```
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        let deq = self.dequeue_pos.load(Ordering::Relaxed);
        let enq = self.enqueue_pos.load(Ordering::Relaxed);

        // Drop the values still sitting between the two tickets.
        for i in 0..enq.wrapping_sub(deq) {
            let slot = &self.buffer[deq.wrapping_add(i) & self.mask];
            unsafe {
                (*slot.value.get()).as_mut_ptr().drop_in_place();
            }
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("BoundedQueue { .. }")
    }
}
