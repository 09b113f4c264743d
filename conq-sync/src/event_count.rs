use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::{Condvar, Mutex};

/// A counting semaphore emulated with a mutex and a condition variable.
///
/// Starts at zero. `post` increments and wakes one waiter; `wait` blocks
/// until the count is positive and then decrements it.
struct Semaphore {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    fn new() -> Semaphore {
        Semaphore {
            count: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cvar.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        // Releasing the lock before the call to `notify_one` means that when
        // the blocked thread wakes it doesn't get woken only to have to wait
        // for us to release the lock.
        drop(count);
        self.cvar.notify_one();
    }
}

/// A wait/notify primitive for consumers of non-blocking queues.
///
/// An `EventCount` solves the race between "I checked, the queue is empty"
/// and "I went to sleep": a waiter announces itself with [`prepare_wait`],
/// re-checks its condition, and only then commits to sleeping with
/// [`commit_wait`]. A producer that changes state and then calls [`notify`]
/// is guaranteed to either be seen by the waiter's re-check or to release
/// the waiter from its sleep — a notification is never lost.
///
/// At most one thread may be between [`prepare_wait`] and
/// [`commit_wait`]/[`cancel_wait`] at a time. Multiple blocking consumers
/// must each own their own `EventCount`.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::thread;
/// use std::sync::Arc;
/// use conq_sync::EventCount;
///
/// let ec = Arc::new(EventCount::new());
/// let flag = Arc::new(AtomicBool::new(false));
///
/// let (ec2, flag2) = (ec.clone(), flag.clone());
/// thread::spawn(move || {
///     flag2.store(true, Ordering::SeqCst);
///     ec2.notify();
/// });
///
/// ec.wait_until(|| flag.load(Ordering::SeqCst));
/// ```
///
/// [`prepare_wait`]: EventCount::prepare_wait
/// [`cancel_wait`]: EventCount::cancel_wait
/// [`commit_wait`]: EventCount::commit_wait
/// [`notify`]: EventCount::notify
pub struct EventCount {
    waiting: AtomicBool,
    sem: Semaphore,
}

impl EventCount {
    /// Creates a new `EventCount` with no waiter registered.
    pub fn new() -> EventCount {
        EventCount {
            waiting: AtomicBool::new(false),
            sem: Semaphore::new(),
        }
    }

    /// Announces that this thread is about to wait.
    ///
    /// The sequentially consistent store is what orders the announcement
    /// before the caller's subsequent re-check of its predicate. With a
    /// weaker ordering the store could be reordered with the predicate
    /// loads, and a concurrent [`notify`] could slip between them unseen.
    ///
    /// [`notify`]: EventCount::notify
    pub fn prepare_wait(&self) {
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Withdraws an announcement made by [`prepare_wait`] without blocking.
    ///
    /// Called when the re-check of the predicate turned true and sleeping
    /// is no longer necessary.
    ///
    /// [`prepare_wait`]: EventCount::prepare_wait
    pub fn cancel_wait(&self) {
        self.waiting.store(false, Ordering::Release);
    }

    /// Blocks until a producer posts a notification.
    ///
    /// Must be preceded by [`prepare_wait`]. May return spuriously if an
    /// earlier wait was cancelled after the notifier had already posted;
    /// callers re-check their predicate in a loop (see [`wait_until`]).
    ///
    /// [`prepare_wait`]: EventCount::prepare_wait
    /// [`wait_until`]: EventCount::wait_until
    pub fn commit_wait(&self) {
        self.sem.wait();
    }

    /// Wakes the waiter, if one is registered.
    ///
    /// Producers call this after publishing the state change the waiter is
    /// interested in. When no waiter is registered this is a single atomic
    /// load.
    pub fn notify(&self) {
        if self.waiting.load(Ordering::Acquire) {
            self.waiting.store(false, Ordering::Release);
            self.sem.post();
        }
    }

    /// Blocks until `pred` returns true.
    ///
    /// Equivalent to the prepare/re-check/commit dance done by hand:
    ///
    /// ```ignore
    /// while !pred() {
    ///     ec.prepare_wait();
    ///     if pred() {
    ///         ec.cancel_wait();
    ///         break;
    ///     }
    ///     ec.commit_wait();
    /// }
    /// ```
    pub fn wait_until<F>(&self, mut pred: F)
    where
        F: FnMut() -> bool,
    {
        while !pred() {
            self.prepare_wait();
            if pred() {
                self.cancel_wait();
                break;
            }
            self.commit_wait();
        }
    }
}

impl Default for EventCount {
    fn default() -> EventCount {
        EventCount::new()
    }
}

impl fmt::Debug for EventCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("EventCount { .. }")
    }
}
