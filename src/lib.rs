//! Lock-free concurrent queues with proxy-collector reclamation.
//!
//! This crate is a facade over three smaller crates:
//!
//! * [`queue`] — the queues themselves: unbounded [`spsc`](queue::spsc),
//!   unbounded [`mpsc`](queue::mpsc), unbounded
//!   [`MpmcQueue`](queue::MpmcQueue), and the bounded ring
//!   [`BoundedQueue`](queue::BoundedQueue).
//! * [`proxy`] — the proxy collectors that give the unbounded MPMC queue
//!   safe node lifetimes: the word-based [`proxy::word`] rotation scheme
//!   and the list-based [`proxy::seq`] alternative.
//! * [`sync`] — [`EventCount`](sync::EventCount), a wait/notify primitive
//!   for consumers that want to block on an empty queue without losing
//!   notifications.
//!
//! # Examples
//!
//! ```
//! use conq::queue::MpmcQueue;
//!
//! let q = MpmcQueue::new();
//! q.push(1);
//! assert_eq!(q.pop(), Some(1));
//! ```

#![warn(missing_docs)]

#[doc(inline)]
pub use conq_proxy as proxy;
#[doc(inline)]
pub use conq_queue as queue;
#[doc(inline)]
pub use conq_sync as sync;
