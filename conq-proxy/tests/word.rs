use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::thread;

use conq_proxy::{Proxy, Reclaim};
use crossbeam_utils::thread::scope;
use rand::{thread_rng, Rng};

const WRITERS: usize = 3;
const READERS: usize = 5;
const REAPERS: usize = 2;

#[cfg(miri)]
const ITERS: usize = 300;
#[cfg(not(miri))]
const ITERS: usize = 150_000;

/// Number of retirements on one collector before a round starts.
const DEFER_LIMIT: u32 = 6;

static ALLOCS: AtomicUsize = AtomicUsize::new(0);
static DROPS: AtomicUsize = AtomicUsize::new(0);

struct Node {
    next: AtomicPtr<Node>,
    defer_next: AtomicPtr<Node>,
}

unsafe impl Reclaim for Node {
    fn defer_link(&self) -> &AtomicPtr<Node> {
        &self.defer_next
    }
}

impl Node {
    fn alloc() -> *mut Node {
        ALLOCS.fetch_add(1, Ordering::Relaxed);
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            defer_next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        DROPS.fetch_add(1, Ordering::Relaxed);
    }
}

/// The classic lock-free stack, used here only to give the readers
/// something to chase pointers through.
struct Stack {
    head: AtomicPtr<Node>,
}

impl Stack {
    fn new() -> Stack {
        Stack {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn push(&self, n: *mut Node) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe {
                (*n).next.store(head, Ordering::Relaxed);
            }
            match self
                .head
                .compare_exchange_weak(head, n, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(h) => head = h,
            }
        }
    }

    fn pop(&self) -> *mut Node {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                return ptr::null_mut();
            }
            let next = unsafe { (*head).next.load(Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return head,
                Err(h) => head = h,
            }
        }
    }

    fn head(&self) -> *mut Node {
        self.head.load(Ordering::Acquire)
    }
}

#[test]
fn stress() {
    let proxy = Proxy::<Node>::new(DEFER_LIMIT);
    let stack = Stack::new();
    let writers = AtomicUsize::new(WRITERS);

    scope(|scope| {
        let proxy = &proxy;
        let stack = &stack;
        let writers = &writers;

        for _ in 0..READERS {
            scope.spawn(move |_| {
                let mut c = proxy.acquire();

                while writers.load(Ordering::Relaxed) != 0 {
                    // Chase the stack under the pin; retired nodes must
                    // stay dereferenceable until we release.
                    let mut n = stack.head();
                    while !n.is_null() {
                        n = unsafe { (*n).next.load(Ordering::Relaxed) };
                    }

                    c = proxy.sync(c);
                    thread::yield_now();
                }

                proxy.release(c);
            });
        }

        for _ in 0..WRITERS {
            scope.spawn(move |_| {
                let pause = thread_rng().gen_range(0..1000);
                for _ in 0..pause {
                    std::hint::spin_loop();
                }

                for i in 0..ITERS {
                    stack.push(Node::alloc());

                    if i % 2 == 0 {
                        let c = proxy.acquire();
                        unsafe {
                            proxy.retire(c, stack.pop());
                        }
                        proxy.release(c);
                        thread::yield_now();
                    }
                }

                // Drain whatever this writer left behind; `retire` ignores
                // the nulls once the stack runs dry.
                for _ in 0..ITERS {
                    let c = proxy.acquire();
                    unsafe {
                        proxy.retire(c, stack.pop());
                    }
                    proxy.release(c);
                }

                writers.fetch_sub(1, Ordering::Relaxed);
            });
        }

        for _ in 0..REAPERS {
            scope.spawn(move |_| {
                while writers.load(Ordering::Relaxed) != 0 {
                    proxy.collect();
                    thread::yield_now();
                }
            });
        }
    })
    .unwrap();

    // No readers are left; free anything the writers' bounded drains
    // missed, then let the proxy destroy whatever is still deferred.
    loop {
        let n = stack.pop();
        if n.is_null() {
            break;
        }
        unsafe {
            drop(Box::from_raw(n));
        }
    }
    drop(proxy);

    assert_eq!(
        DROPS.load(Ordering::Relaxed),
        ALLOCS.load(Ordering::Relaxed),
    );
}
