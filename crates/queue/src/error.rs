//! Queue Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A queue error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a submitted job produced no value for its submitter.
///
/// The job's *own* failure is never one of these: an operation returning a
/// `Result` hands that `Result` back untouched.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The worker task is gone (runtime shut down, or every queue handle dropped).
    #[display("job queue is closed")]
    Closed,
    /// The operation panicked. The queue keeps draining regardless.
    #[display("queued job panicked")]
    Panicked,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Panicked)
    }
}
