//! Build-artifact service.
//!
//! Turns a package identity into a published `compile_commands.json`:
//! build the package inside the sandbox, find the database the build left
//! behind, check that it is complete, and rename a copy into the package's
//! source directory.

mod artifact;
mod publish;

pub use crate::service::artifact::{
    ARTIFACT_FILE_NAME, ArtifactLayout, BuildArtifact, CompdbEntry, missing_sources, portage_cache_dir,
};
pub use crate::service::publish::publish;

use crate::error::{ErrorKind, Result};
use crate::package::PackageIdentity;
use crate::sink::OutputHandle;
use compdb_sandbox::error::ErrorKind as SandboxErrorKind;
use compdb_sandbox::{ExecOptions, ExecOutput, SandboxHandle, command_line};
use exn::{OptionExt, ResultExt};
use parking_lot::RwLock;
use regex::Regex;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;

/// Name of the published database inside a package's source directory.
pub const DESTINATION_FILE_NAME: &str = "compile_commands.json";

/// Words Portage uses when refusing to reuse a cached build directory.
static STALE_CACHE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(stale|mismatch(ed)?|differ(s|ent)?|corrupt(ed)?|remove)\b").unwrap());

/// `USE` flags the build is run with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Only emit the database; generated sources are not produced.
    DatabaseOnly,
    /// Compile everything, then emit the database.
    Full,
}

impl BuildMode {
    pub fn use_flag(&self) -> &'static str {
        match self {
            Self::DatabaseOnly => "compdb_only",
            Self::Full => "compilation_database",
        }
    }
}

/// Builds, verifies and publishes compilation databases for the current
/// board. Clones share the board.
#[derive(Clone)]
pub struct CompdbService {
    sandbox: SandboxHandle,
    output: OutputHandle,
    source_root: PathBuf,
    board: Arc<RwLock<String>>,
    layout: ArtifactLayout,
}

impl CompdbService {
    pub fn new(
        sandbox: SandboxHandle,
        output: OutputHandle,
        source_root: impl Into<PathBuf>,
        board: impl Into<String>,
        layout: ArtifactLayout,
    ) -> Self {
        Self { sandbox, output, source_root: source_root.into(), board: Arc::new(RwLock::new(board.into())), layout }
    }

    pub fn board(&self) -> String {
        self.board.read().clone()
    }

    /// Builds started from now on target `board`.
    pub fn set_board(&self, board: impl Into<String>) {
        let board = board.into();
        tracing::info!(%board, "Switching board");
        *self.board.write() = board;
    }

    /// Host path the database of `package` is published to.
    pub fn destination(&self, package: &PackageIdentity) -> PathBuf {
        self.source_root.join(&package.source_dir).join(DESTINATION_FILE_NAME)
    }

    /// Produce and publish the database of `package`.
    ///
    /// A database-only build runs first. If the resulting database lists
    /// sources that do not exist yet, the package generates code at build
    /// time, so one full build follows and its database is published
    /// without further checks.
    pub async fn generate(&self, package: &PackageIdentity, cancel: &CancellationToken) -> Result<()> {
        let board = self.board();
        tracing::info!(package = %package, %board, "Generating compilation database");
        self.run_build(package, &board, BuildMode::DatabaseOnly, cancel).await?;
        let mut artifact = self.fetch(package, &board).await?;

        let missing = missing_sources(&self.sandbox.host_path(&artifact.path())).await?;
        if missing > 0 {
            tracing::info!(package = %package, missing, "Database references generated sources; running a full build");
            self.run_build(package, &board, BuildMode::Full, cancel).await?;
            artifact = self.fetch(package, &board).await?;
        }

        let destination = self.destination(package);
        publish(&self.sandbox.host_path(&artifact.path()), &destination).await?;
        tracing::info!(package = %package, path = %destination.display(), "Published compilation database");
        Ok(())
    }

    /// Run `env USE=<flag> emerge-<board> <name>` and stream its output to
    /// the output sink.
    pub async fn run_build(
        &self,
        package: &PackageIdentity,
        board: &str,
        mode: BuildMode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = vec![format!("USE={}", mode.use_flag()), format!("emerge-{board}"), package.name.clone()];
        let rendered = command_line("env", &args);
        self.output.append_line(&rendered);

        let options = ExecOptions::default().with_cancel(cancel.clone());
        let output = match self.sandbox.exec("env", &args, options).await {
            Ok(output) => output,
            Err(e) if matches!(e.deref(), SandboxErrorKind::Cancelled) => {
                self.output.append_line("Build cancelled");
                return Err(e).or_raise(|| ErrorKind::Cancelled);
            },
            Err(e) => {
                let reason = e.deref().to_string();
                self.output.append_line(&reason);
                return Err(e).or_raise(|| ErrorKind::RunBuildFailed(reason));
            },
        };
        for line in output.lines() {
            self.output.append_line(line);
        }

        if output.succeeded() {
            return Ok(());
        }
        if let Some(cache) = self.stale_cache(package, board, &output) {
            exn::bail!(ErrorKind::StaleCacheMustBeRemoved(cache));
        }
        let reason = match output.exit_code {
            Some(code) => format!("`{rendered}` exited with status {code}"),
            None => format!("`{rendered}` was terminated by a signal"),
        };
        exn::bail!(ErrorKind::RunBuildFailed(reason))
    }

    async fn fetch(&self, package: &PackageIdentity, board: &str) -> Result<BuildArtifact> {
        let artifact = self.layout.locate(self.sandbox.as_ref(), board, package).await;
        artifact.ok_or_raise(|| ErrorKind::ArtifactNotProduced)
    }

    /// Host path of the package's Portage cache directory, if the failed
    /// build blamed it.
    fn stale_cache(&self, package: &PackageIdentity, board: &str, output: &ExecOutput) -> Option<PathBuf> {
        let cache_dir = portage_cache_dir(board, package);
        let needle = cache_dir.to_string_lossy();
        output
            .lines()
            .any(|line| line.contains(needle.as_ref()) && STALE_CACHE.is_match(line))
            .then(|| self.sandbox.host_path(&cache_dir))
    }
}
