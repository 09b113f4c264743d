//! Blocking helpers for non-blocking queues.
//!
//! The queues in this workspace never block; a consumer that polls an empty
//! queue in a loop burns a core. [`EventCount`] lets such a consumer go to
//! sleep without losing a notification that races with the decision to sleep.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod event_count;

pub use self::event_count::EventCount;
