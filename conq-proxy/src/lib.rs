//! Proxy collectors: deferred reclamation for lock-free readers.
//!
//! A lock-free structure that unlinks a node cannot free it right away:
//! a concurrent reader may have loaded a pointer to it a moment earlier and
//! still be dereferencing it. A proxy collector stands between the two. A
//! reader *pins* a collector before touching shared nodes and releases it
//! afterwards; a writer hands unlinked nodes to the collector instead of
//! freeing them. The collector destroys a node only once every reader that
//! could possibly have seen it has released its pin.
//!
//! Two implementations are provided:
//!
//! * [`word::Proxy`] packs a reference count and a collector index into a
//!   single atomic word and rotates through a small fixed array of
//!   collectors. Retired nodes are chained through an intrusive link
//!   ([`Reclaim::defer_link`]) and destroyed two quiescence rounds later.
//! * [`seq::Proxy`] keeps a linked list of collectors behind a double-word
//!   `(collector, sequence)` tail and runs an arbitrary deferred closure
//!   when a collector drains. Drained collectors are recycled through a
//!   free list rather than freed.
//!
//! The guarantees are the same for both: a node retired while a reader is
//! pinned outlives that pin, every retired node is destroyed exactly once,
//! and retirement cannot be starved as long as pins keep being released.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod seq;
pub mod word;

pub use self::word::{Collector, Proxy, Reclaim};
