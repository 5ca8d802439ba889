//! Generation Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! The build-artifact service constructs most of these kinds; generators
//! add [`ErrorKind::AlreadyGenerating`] and otherwise pass them through
//! untouched. The orchestrator is the only place they are rendered for a
//! human.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A generation error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The build command failed or could not be run. Often fixed by setting
    /// up the chroot or the board sysroot.
    #[display("build failed: {_0}")]
    RunBuildFailed(#[error(not(source))] String),
    /// The build succeeded but no usable database came out of it. Points at
    /// a change in the build system rather than at the user's environment.
    #[display("build succeeded but produced no compilation database")]
    ArtifactNotProduced,
    /// The database could not be written to its destination.
    #[display("failed to write {}: {reason}", destination.display())]
    CopyFailed { destination: PathBuf, reason: String },
    /// The build system's own cache for this package is stale; removing the
    /// directory (host path) and retrying fixes it.
    #[display("build cache {} is stale", _0.display())]
    StaleCacheMustBeRemoved(#[error(not(source))] PathBuf),
    /// The generation was cancelled before it finished.
    #[display("generation cancelled")]
    Cancelled,
    /// Another request for the same package is already queued or running;
    /// nothing was done.
    #[display("already generating")]
    AlreadyGenerating,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RunBuildFailed(_) | Self::Cancelled)
    }

    /// Stable identifier of the kind, ignoring payload. Used to suppress
    /// repeated reports of the same problem.
    pub fn kind_key(&self) -> &'static str {
        match self {
            Self::RunBuildFailed(_) => "run-build-failed",
            Self::ArtifactNotProduced => "artifact-not-produced",
            Self::CopyFailed { .. } => "copy-failed",
            Self::StaleCacheMustBeRemoved(_) => "stale-cache",
            Self::Cancelled => "cancelled",
            Self::AlreadyGenerating => "already-generating",
        }
    }

    /// What to tell the user, including what they can do about it.
    pub fn user_message(&self) -> String {
        match self {
            Self::RunBuildFailed(reason) => {
                format!("Failed to build the package ({reason}). Check the log; the chroot or board may need setting up.")
            },
            Self::ArtifactNotProduced => {
                "The build finished but did not produce compile_commands.json. This is likely a bug; please report it."
                    .to_string()
            },
            Self::CopyFailed { destination, reason } => format!(
                "Could not write {} ({reason}). Remove the file and try again.",
                destination.display()
            ),
            Self::StaleCacheMustBeRemoved(cache) => {
                format!("The build cache is stale. Remove {} and try again.", cache.display())
            },
            Self::Cancelled => "Generation was cancelled.".to_string(),
            Self::AlreadyGenerating => "A build for this package is already running.".to_string(),
        }
    }
}
