//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A command-line error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for command-line operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration could not be loaded or is invalid.
    #[display("configuration error")]
    Config,
    /// No way into the build chroot.
    #[display("cannot reach the build chroot")]
    Sandbox,
    /// A file argument could not be made absolute.
    #[display("cannot resolve {}", _0.display())]
    Path(#[error(not(source))] PathBuf),
}
