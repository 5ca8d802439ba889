//! Compilation database generation.
//!
//! Keeps `compile_commands.json` fresh for packages built inside the
//! ChromiumOS chroot:
//!
//! - [`service`] builds a package, checks the database it emitted and
//!   publishes it atomically next to the package's sources.
//! - [`generator`] defines the per-build-system protocol and the Portage
//!   generators for platform2 packages and kernels.
//! - [`orchestrator`] dispatches editor events to generators, serializes
//!   builds through one [`compdb_queue::JobQueue`] and renders failures.

pub mod error;
pub mod generator;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod orchestrator;
pub mod package;
pub mod service;
pub mod sink;
pub mod state;

pub use crate::generator::{Document, EbuildGenerator, Family, Generator, GeneratorFactory, ShouldGenerate};
pub use crate::orchestrator::{DispatchOutcome, Orchestrator};
pub use crate::package::{PackageIdentity, PackageMapper, PackageTable};
