use thiserror::Error;

use crate::id::TimerId;

/// Errors raised by timers and the registry.
///
/// Validation failures are returned synchronously to the caller. Deadline
/// expiry is never returned from a method: it reaches the caller as the
/// argument of the launch callback, or as the error of a raced future.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The identifier is an empty string or zero.
    #[error("`id` must not be an empty string or equal to 0, got {0:?}")]
    InvalidIdentifier(String),

    #[error("timer `{0}` already exists, retrieve it with `Registry::get_by_id`")]
    DuplicateIdentifier(TimerId),

    /// A textual option could not be parsed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timer `{0}` already launched")]
    AlreadyRunning(TimerId),

    #[error("timer is being deleted")]
    EntityDestroyed,

    #[error("timer `{0}` must be aborted or done before it is destroyed")]
    CannotDestroyWhileRunning(TimerId),

    /// Default payload handed to the callback when the deadline expires.
    #[error("timer `{0}` timed out")]
    TimeoutFired(TimerId),

    /// The timer was driven from a context that cannot service it.
    #[error("unexpected invocation: {0}")]
    InvalidInvocation(&'static str),
}

impl TimerError {
    /// Whether this error is the timeout payload rather than a misuse.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutFired(_))
    }
}

/// A specialized `Result` type for timer operations.
pub type Result<T, E = TimerError> = std::result::Result<T, E>;
