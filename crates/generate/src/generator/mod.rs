//! Generator protocol.
//!
//! One [`Generator`] per build-system family decides which documents it is
//! responsible for and knows how to produce their compilation database.
//! Generators are created from a [`GeneratorFactory`] once the orchestrator
//! is asked to register them, and they receive the shared output sink and
//! job queue at that point.

mod ebuild;

pub use crate::generator::ebuild::{EbuildGenerator, Family};

use crate::error::Result;
use crate::sink::OutputHandle;
use async_trait::async_trait;
use compdb_queue::JobQueue;
use derive_more::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A source file the editor (or the command line) is looking at.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Document {
    pub path: PathBuf,
    /// Editor language identifier: `c`, `cpp`, ...
    pub language_id: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, language_id: impl Into<String>) -> Self {
        Self { path: path.into(), language_id: language_id.into() }
    }

    /// Infer the language from the file extension. Headers count as C so
    /// both C and C++ generators pick them up.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default().to_ascii_lowercase();
        let language_id = match extension.as_str() {
            "c" | "h" => "c".to_string(),
            "cc" | "cpp" | "cxx" | "c++" | "hh" | "hpp" | "hxx" | "inl" => "cpp".to_string(),
            _ => extension,
        };
        Self { path, language_id }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Whether saving this file can change how its package compiles.
    pub fn is_build_definition(&self) -> bool {
        let Some(name) = self.file_name() else {
            return false;
        };
        matches!(name, "BUILD.gn" | "CMakeLists.txt" | "Makefile")
            || name.starts_with("Kconfig")
            || matches!(Path::new(name).extension().and_then(|ext| ext.to_str()), Some("gn" | "gni" | "mk" | "ebuild"))
    }
}

/// A generator's answer to "does this document need a build?".
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ShouldGenerate {
    #[display("yes")]
    Yes,
    /// Not this generator's kind of document.
    #[display("no (unsupported)")]
    NoUnsupported,
    /// Already generated and still on disk.
    #[display("no (up to date)")]
    NoNeedNoChange,
    /// A build for the package is queued or running.
    #[display("no (generating)")]
    NoGenerating,
    /// The last attempt failed; only a forced run retries.
    #[display("no (failed)")]
    NoHasFailed,
}

/// What every generator gets when it is instantiated.
#[derive(Clone)]
pub struct GeneratorContext {
    pub output: OutputHandle,
    pub queue: JobQueue,
}

pub type GeneratorHandle = Arc<dyn Generator>;
pub type GeneratorFactory = Box<dyn FnOnce(&GeneratorContext) -> GeneratorHandle + Send>;

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails; anything unexpected is `NoUnsupported`.
    async fn should_generate(&self, document: &Document) -> ShouldGenerate;

    /// Build and publish the database for the package owning `document`.
    /// Fails with [`ErrorKind::AlreadyGenerating`] without doing anything
    /// if a build for that package is already queued or running.
    ///
    /// [`ErrorKind::AlreadyGenerating`]: crate::error::ErrorKind::AlreadyGenerating
    async fn generate(&self, document: &Document, cancel: CancellationToken) -> Result<()>;

    /// Target `board` from the next build on. Callers follow up with
    /// [`Generator::reset`].
    fn set_board(&self, _board: &str) {}

    /// Forget everything; every package goes back to never attempted.
    /// Builds still in flight no longer record their outcome.
    fn reset(&self);

    /// Forget the package owning `document`. Returns whether anything was
    /// forgotten.
    fn invalidate(&self, document: &Document) -> bool;

    fn dispose(&self) {}
}
