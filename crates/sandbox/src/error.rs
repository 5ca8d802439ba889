//! Sandbox Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! A command that ran and exited non-zero is **not** an error here; that is
//! reported through [`ExecOutput`](crate::ExecOutput). These kinds cover the
//! cases where no exit status could be obtained at all.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A sandbox error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("cros_sdk not found; is this a ChromiumOS checkout?")]
    CrosSdkNotFound,
    /// Source root or chroot path is unusable.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// The process could not be started.
    #[display("failed to launch `{_0}`")]
    Spawn(#[error(not(source))] String),
    /// The process started but its output could not be collected.
    #[display("I/O error while running `{_0}`")]
    Io(#[error(not(source))] String),
    /// The cancellation token fired; the process has been killed.
    #[display("command cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::Io(_))
    }
}
