use crate::error::{ErrorKind, Result};
use crate::generator::{Document, Generator, GeneratorContext, GeneratorFactory, GeneratorHandle, ShouldGenerate};
use crate::package::{MapperHandle, PackageIdentity};
use crate::service::{ArtifactLayout, CompdbService};
use crate::state::{self, GenerationState, GenerationStates};
use async_trait::async_trait;
use compdb_queue::JobQueue;
use compdb_sandbox::SandboxHandle;
use exn::ResultExt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const KERNEL_CATEGORY: &str = "sys-kernel";

/// Build-system families built through Portage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// User-space packages; GN based, databases land in the work directory.
    Platform2,
    /// Kernel trees; databases land in the package cache.
    Kernel,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Platform2 => "platform2",
            Self::Kernel => "kernel",
        }
    }

    pub fn accepts(&self, package: &PackageIdentity) -> bool {
        match self {
            Self::Platform2 => package.category != KERNEL_CATEGORY,
            Self::Kernel => package.category == KERNEL_CATEGORY,
        }
    }

    pub fn languages(&self) -> &'static [&'static str] {
        match self {
            Self::Platform2 => &["c", "cpp"],
            Self::Kernel => &["c"],
        }
    }

    pub fn layout(&self) -> ArtifactLayout {
        match self {
            Self::Platform2 => ArtifactLayout::PortageWork,
            Self::Kernel => ArtifactLayout::PortageCache,
        }
    }
}

/// Generator for packages built with `emerge-<board>`.
pub struct EbuildGenerator {
    family: Family,
    mapper: MapperHandle,
    service: CompdbService,
    queue: JobQueue,
    states: GenerationStates,
}

impl EbuildGenerator {
    pub fn new(
        family: Family,
        mapper: MapperHandle,
        sandbox: SandboxHandle,
        source_root: impl Into<PathBuf>,
        board: impl Into<String>,
        context: &GeneratorContext,
    ) -> Self {
        let service = CompdbService::new(sandbox, context.output.clone(), source_root, board, family.layout());
        Self { family, mapper, service, queue: context.queue.clone(), states: GenerationStates::new() }
    }

    /// Defer construction until the orchestrator hands out its context.
    pub fn factory(
        family: Family,
        mapper: MapperHandle,
        sandbox: SandboxHandle,
        source_root: impl Into<PathBuf>,
        board: impl Into<String>,
    ) -> GeneratorFactory {
        let (source_root, board) = (source_root.into(), board.into());
        Box::new(move |context: &GeneratorContext| -> GeneratorHandle {
            Arc::new(Self::new(family, mapper, sandbox, source_root, board, context))
        })
    }

    pub fn states(&self) -> &GenerationStates {
        &self.states
    }

    /// Package owning `document`, if it belongs to this family at all.
    fn package(&self, document: &Document) -> Option<PackageIdentity> {
        if !self.family.languages().contains(&document.language_id.as_str()) {
            return None;
        }
        self.owner(document)
    }

    fn owner(&self, document: &Document) -> Option<PackageIdentity> {
        self.mapper.from_file_path(&document.path).filter(|package| self.family.accepts(package))
    }
}

#[async_trait]
impl Generator for EbuildGenerator {
    fn name(&self) -> &str {
        self.family.name()
    }

    async fn should_generate(&self, document: &Document) -> ShouldGenerate {
        let Some(package) = self.package(document) else {
            return ShouldGenerate::NoUnsupported;
        };
        let destination = self.service.destination(&package);
        let exists = tokio::fs::try_exists(&destination).await.unwrap_or(false);
        let decision = state::decide(self.states.get(&package.atom()), exists);
        tracing::debug!(generator = self.name(), package = %package, %decision, "Checked whether to generate");
        decision
    }

    async fn generate(&self, document: &Document, cancel: CancellationToken) -> Result<()> {
        let Some(package) = self.package(document) else {
            exn::bail!(ErrorKind::RunBuildFailed(format!(
                "{} does not belong to a {} package",
                document.path.display(),
                self.name()
            )));
        };
        let atom = package.atom();
        let Some(claim) = self.states.try_begin(&atom) else {
            exn::bail!(ErrorKind::AlreadyGenerating);
        };

        let service = self.service.clone();
        let job = self.queue.submit(async move { service.generate(&package, &cancel).await });
        let result = match job.await {
            Ok(result) => result,
            Err(e) => {
                let reason = e.deref().to_string();
                Err(e).or_raise(|| ErrorKind::RunBuildFailed(reason))
            },
        };

        let state = match &result {
            Ok(()) => GenerationState::Generated,
            Err(e) => {
                tracing::warn!(generator = self.name(), package = %atom, error = %e.deref(), "Generation failed");
                GenerationState::Failed
            },
        };
        self.states.finish(&atom, claim, state);
        result
    }

    fn set_board(&self, board: &str) {
        self.service.set_board(board);
    }

    fn reset(&self) {
        tracing::debug!(generator = self.name(), forgotten = self.states.len(), "Resetting generation state");
        self.states.clear();
    }

    fn invalidate(&self, document: &Document) -> bool {
        match self.owner(document) {
            Some(package) => self.states.remove(&package.atom()),
            None => false,
        }
    }

    fn dispose(&self) {
        self.states.clear();
    }
}
