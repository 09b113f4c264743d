//! Concurrent queues.
//!
//! This crate provides one queue per producer/consumer topology:
//!
//! * [`spsc`] — an unbounded single-producer single-consumer queue that
//!   recycles its nodes through a producer-side cache.
//! * [`mpsc`] — an unbounded multi-producer single-consumer queue.
//! * [`MpmcQueue`] — an unbounded multi-producer multi-consumer queue,
//!   backed by a proxy collector for safe node reclamation.
//! * [`BoundedQueue`] — a bounded multi-producer multi-consumer queue over
//!   a fixed ring of sequence-numbered cells.
//!
//! The unbounded queues never fail to push; the bounded queue hands the
//! value back as a [`PushError`] when full. Popping an empty queue returns
//! `None`. None of the queues block: consumers that want to sleep on an
//! empty queue combine `pop` with an event-count (see the `conq-sync`
//! crate).

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod bounded;
mod err;
mod mpmc;
pub mod mpsc;
pub mod spsc;

pub use self::bounded::BoundedQueue;
pub use self::err::PushError;
pub use self::mpmc::MpmcQueue;
