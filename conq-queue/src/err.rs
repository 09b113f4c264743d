use core::fmt;

/// Error which occurs when pushing into a full queue.
///
/// Carries the rejected value so the caller can retry with it.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PushError<T>(pub T);

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "PushError(..)".fmt(f)
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "pushing into a full queue".fmt(f)
    }
}

impl<T: Send> std::error::Error for PushError<T> {}
