//! Generator registry and event dispatch.
//!
//! The editor layer (or the command line) reports what the user is doing;
//! the [`Orchestrator`] asks every registered generator whether that calls
//! for a build, runs the builds through the shared job queue, reloads the
//! downstream index after each success and renders each failure at most as
//! often as the user tolerates.

mod report;

pub use crate::orchestrator::report::DEFAULT_ISSUE_URL;

use crate::error::ErrorKind;
use crate::generator::{Document, GeneratorContext, GeneratorFactory, GeneratorHandle, ShouldGenerate};
use crate::orchestrator::report::ErrorReporter;
use crate::sink::{NotifierHandle, OutputHandle, ReloadHandle};
use compdb_queue::JobQueue;
use std::ops::Deref;
use std::sync::OnceLock;
use tokio::sync::{OnceCell, broadcast};
use tokio_util::sync::CancellationToken;

const MULTIPLE_GENERATORS: &str = "multiple-generators";

/// What one dispatch cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Names of the generators that published a database.
    pub generated: Vec<String>,
    /// Generators that failed, with why.
    pub failed: Vec<(String, ErrorKind)>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Orchestrator {
    context: GeneratorContext,
    notifier: NotifierHandle,
    reload: ReloadHandle,
    generators: OnceLock<Vec<GeneratorHandle>>,
    activated: OnceCell<()>,
    reporter: ErrorReporter,
    cancel: CancellationToken,
    completed: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create an orchestrator with its own job queue.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn new(output: OutputHandle, notifier: NotifierHandle, reload: ReloadHandle) -> Self {
        let (completed, _) = broadcast::channel(16);
        Self {
            context: GeneratorContext { output, queue: JobQueue::new() },
            notifier,
            reload,
            generators: OnceLock::new(),
            activated: OnceCell::new(),
            reporter: ErrorReporter::new(DEFAULT_ISSUE_URL),
            cancel: CancellationToken::new(),
            completed,
        }
    }

    /// Where the "File a bug" action leads.
    pub fn with_issue_url(mut self, url: impl Into<String>) -> Self {
        self.reporter.set_issue_url(url);
        self
    }

    /// Instantiate the generators. Only the first call has any effect.
    pub fn register(&self, factories: Vec<GeneratorFactory>) {
        let mut instantiated = false;
        let generators = self.generators.get_or_init(|| {
            instantiated = true;
            factories.into_iter().map(|factory| factory(&self.context)).collect()
        });
        match instantiated {
            true => {
                let names: Vec<_> = generators.iter().map(|generator| generator.name().to_string()).collect();
                tracing::info!(generators = ?names, "Registered generators");
            },
            false => tracing::warn!("Generators are already registered; ignoring"),
        }
    }

    fn generators(&self) -> &[GeneratorHandle] {
        self.generators.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Every registered generator's decision for `document`.
    pub async fn decisions(&self, document: &Document) -> Vec<(String, ShouldGenerate)> {
        let mut decisions = Vec::with_capacity(self.generators().len());
        for generator in self.generators() {
            decisions.push((generator.name().to_string(), generator.should_generate(document).await));
        }
        decisions
    }

    /// The user switched to `document`.
    pub async fn on_document_activated(&self, document: &Document) -> DispatchOutcome {
        self.dispatch(document, false).await
    }

    /// The user saved `document`. Saving a build definition makes the
    /// owning package eligible for generation again.
    pub async fn on_document_saved(&self, document: &Document) -> DispatchOutcome {
        if document.is_build_definition() {
            for generator in self.generators() {
                if generator.invalidate(document) {
                    tracing::info!(
                        generator = generator.name(),
                        path = %document.path.display(),
                        "Build definition changed; package will be regenerated"
                    );
                }
            }
        }
        self.dispatch(document, false).await
    }

    /// Explicit user request: retry even after a failure or when nothing
    /// changed.
    pub async fn force_generate(&self, document: &Document) -> DispatchOutcome {
        self.dispatch(document, true).await
    }

    /// Fires after every dispatch cycle, whether it built anything or not.
    pub fn on_did_maybe_generate(&self) -> broadcast::Receiver<()> {
        self.completed.subscribe()
    }

    /// Board or other build configuration changed; nothing generated so far
    /// can be trusted.
    pub fn on_configuration_changed(&self) {
        for generator in self.generators() {
            generator.reset();
        }
    }

    /// The target board changed: later builds use `board` and every package
    /// is generated again.
    pub fn on_board_changed(&self, board: &str) {
        for generator in self.generators() {
            generator.set_board(board);
        }
        self.on_configuration_changed();
    }

    /// Cancel in-flight builds and release the generators.
    pub fn dispose(&self) {
        self.cancel.cancel();
        for generator in self.generators() {
            generator.dispose();
        }
    }

    async fn dispatch(&self, document: &Document, force: bool) -> DispatchOutcome {
        let mut selected = Vec::new();
        for generator in self.generators() {
            let decision = generator.should_generate(document).await;
            let run = match decision {
                ShouldGenerate::Yes => true,
                ShouldGenerate::NoNeedNoChange | ShouldGenerate::NoHasFailed => force,
                ShouldGenerate::NoUnsupported | ShouldGenerate::NoGenerating => false,
            };
            tracing::debug!(generator = generator.name(), %decision, force, run, "Dispatch decision");
            if run {
                selected.push(generator);
            }
        }

        if selected.len() > 1 {
            let names: Vec<_> = selected.iter().map(|generator| generator.name()).collect();
            let message = format!(
                "Internal error: {} is handled by more than one generator ({}). Please report this.",
                document.path.display(),
                names.join(", ")
            );
            self.reporter
                .report_once(MULTIPLE_GENERATORS, &message, self.notifier.as_ref(), self.context.output.as_ref())
                .await;
        }

        let mut outcome = DispatchOutcome::default();
        for generator in selected {
            self.activated.get_or_init(|| self.reload.activate()).await;
            match generator.generate(document, self.cancel.child_token()).await {
                Ok(()) => {
                    self.reload.reload().await;
                    outcome.generated.push(generator.name().to_string());
                },
                // Lost the race for the package to a concurrent event; that
                // build reports for itself.
                Err(e) if matches!(e.deref(), ErrorKind::AlreadyGenerating) => {
                    let path = document.path.display();
                    tracing::debug!(generator = generator.name(), %path, "Already generating");
                },
                Err(e) => {
                    self.reporter
                        .report(generator.name(), &e, self.notifier.as_ref(), self.context.output.as_ref())
                        .await;
                    outcome.failed.push((generator.name().to_string(), e.deref().clone()));
                },
            }
        }

        // Nobody listening is fine.
        _ = self.completed.send(());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::generator::{EbuildGenerator, Family, Generator};
    use crate::mock::{CountingReload, RecordingOutput, ScriptedNotifier};
    use crate::package::{MapperHandle, PackageTable};
    use crate::service::ARTIFACT_FILE_NAME;
    use crate::sink::{ErrorAction, IndexReloadTrigger};
    use async_trait::async_trait;
    use compdb_sandbox::{ExecOutput, MockSandbox};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Generator with a fixed decision and a fixed outcome.
    struct FakeGenerator {
        name: &'static str,
        decision: Mutex<ShouldGenerate>,
        failure: Option<ErrorKind>,
        generated: AtomicUsize,
        resets: AtomicUsize,
        invalidated: AtomicUsize,
    }

    impl FakeGenerator {
        fn new(name: &'static str, decision: ShouldGenerate, failure: Option<ErrorKind>) -> Arc<Self> {
            Arc::new(Self {
                name,
                decision: Mutex::new(decision),
                failure,
                generated: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                invalidated: AtomicUsize::new(0),
            })
        }

        fn generated(&self) -> usize {
            self.generated.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        fn name(&self) -> &str {
            self.name
        }

        async fn should_generate(&self, _document: &Document) -> ShouldGenerate {
            *self.decision.lock()
        }

        async fn generate(&self, _document: &Document, _cancel: CancellationToken) -> Result<()> {
            self.generated.fetch_add(1, Ordering::AcqRel);
            match &self.failure {
                Some(kind) => exn::bail!(kind.clone()),
                None => Ok(()),
            }
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::AcqRel);
        }

        fn invalidate(&self, _document: &Document) -> bool {
            self.invalidated.fetch_add(1, Ordering::AcqRel);
            true
        }
    }

    fn factory(generator: &Arc<FakeGenerator>) -> GeneratorFactory {
        let generator = generator.clone();
        Box::new(move |_: &GeneratorContext| -> GeneratorHandle { generator })
    }

    struct Fixture {
        orchestrator: Orchestrator,
        notifier: Arc<ScriptedNotifier>,
        reload: Arc<CountingReload>,
    }

    fn fixture(choices: Vec<Option<ErrorAction>>, generators: &[&Arc<FakeGenerator>]) -> Fixture {
        let notifier = Arc::new(ScriptedNotifier::new(choices));
        let reload = Arc::new(CountingReload::default());
        let orchestrator = Orchestrator::new(Arc::new(RecordingOutput::default()), notifier.clone(), reload.clone());
        orchestrator.register(generators.iter().map(|generator| factory(generator)).collect());
        Fixture { orchestrator, notifier, reload }
    }

    fn document() -> Document {
        Document::from_path("/src/src/platform2/codelab/codelab.cc")
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let instantiated = Arc::new(AtomicUsize::new(0));
        let counting = |instantiated: &Arc<AtomicUsize>| -> GeneratorFactory {
            let instantiated = instantiated.clone();
            Box::new(move |_: &GeneratorContext| -> GeneratorHandle {
                instantiated.fetch_add(1, Ordering::AcqRel);
                FakeGenerator::new("platform2", ShouldGenerate::Yes, None)
            })
        };
        let fixture = fixture(vec![], &[]);
        // The fixture registered an empty list already.
        fixture.orchestrator.register(vec![counting(&instantiated)]);
        assert_eq!(instantiated.load(Ordering::Acquire), 0);

        let orchestrator = Orchestrator::new(
            Arc::new(RecordingOutput::default()),
            Arc::new(ScriptedNotifier::default()),
            Arc::new(CountingReload::default()),
        );
        orchestrator.register(vec![counting(&instantiated)]);
        orchestrator.register(vec![counting(&instantiated)]);
        assert_eq!(instantiated.load(Ordering::Acquire), 1);
        assert_eq!(orchestrator.decisions(&document()).await, [("platform2".to_string(), ShouldGenerate::Yes)]);
    }

    #[tokio::test]
    async fn test_activates_once_and_reloads_after_each_success() {
        let generator = FakeGenerator::new("platform2", ShouldGenerate::Yes, None);
        let fixture = fixture(vec![], &[&generator]);

        let outcome = fixture.orchestrator.on_document_activated(&document()).await;
        assert_eq!(outcome.generated, ["platform2"]);
        fixture.orchestrator.on_document_activated(&document()).await;
        assert_eq!(generator.generated(), 2);
        assert_eq!(fixture.reload.activations(), 1);
        assert_eq!(fixture.reload.reloads(), 2);
    }

    #[tokio::test]
    async fn test_nothing_selected_does_not_activate() {
        let generator = FakeGenerator::new("platform2", ShouldGenerate::NoUnsupported, None);
        let fixture = fixture(vec![], &[&generator]);
        let mut completed = fixture.orchestrator.on_did_maybe_generate();

        let outcome = fixture.orchestrator.force_generate(&document()).await;
        assert_eq!(outcome, DispatchOutcome::default());
        assert!(completed.try_recv().is_ok());
        assert_eq!(fixture.reload.activations(), 0);
    }

    #[rstest::rstest]
    #[case(ShouldGenerate::Yes, false, 1)]
    #[case(ShouldGenerate::Yes, true, 1)]
    #[case(ShouldGenerate::NoNeedNoChange, false, 0)]
    #[case(ShouldGenerate::NoNeedNoChange, true, 1)]
    #[case(ShouldGenerate::NoHasFailed, false, 0)]
    #[case(ShouldGenerate::NoHasFailed, true, 1)]
    #[case(ShouldGenerate::NoGenerating, true, 0)]
    #[case(ShouldGenerate::NoUnsupported, true, 0)]
    #[tokio::test]
    async fn test_force_overrides_only_settled_states(
        #[case] decision: ShouldGenerate,
        #[case] force: bool,
        #[case] expected: usize,
    ) {
        let generator = FakeGenerator::new("platform2", decision, None);
        let fixture = fixture(vec![], &[&generator]);
        match force {
            true => fixture.orchestrator.force_generate(&document()).await,
            false => fixture.orchestrator.on_document_activated(&document()).await,
        };
        assert_eq!(generator.generated(), expected);
    }

    #[tokio::test]
    async fn test_multiple_matches_warn_once_and_run_all() {
        let platform2 = FakeGenerator::new("platform2", ShouldGenerate::Yes, None);
        let kernel = FakeGenerator::new("kernel", ShouldGenerate::Yes, None);
        let fixture = fixture(vec![], &[&platform2, &kernel]);

        fixture.orchestrator.on_document_activated(&document()).await;
        fixture.orchestrator.on_document_activated(&document()).await;
        assert_eq!((platform2.generated(), kernel.generated()), (2, 2));
        let shown = fixture.notifier.shown();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].message.contains("more than one generator (platform2, kernel)"));
    }

    #[rstest::rstest]
    #[case(Some(ErrorAction::Ignore), 1)]
    #[case(None, 2)]
    #[tokio::test]
    async fn test_repeated_failure_rendering(#[case] choice: Option<ErrorAction>, #[case] expected_shown: usize) {
        let failure = Some(ErrorKind::ArtifactNotProduced);
        let generator = FakeGenerator::new("platform2", ShouldGenerate::NoHasFailed, failure);
        let fixture = fixture(vec![choice], &[&generator]);

        let outcome = fixture.orchestrator.force_generate(&document()).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.failed, [("platform2".to_string(), ErrorKind::ArtifactNotProduced)]);
        fixture.orchestrator.force_generate(&document()).await;
        assert_eq!(fixture.notifier.shown().len(), expected_shown);
        assert_eq!(fixture.reload.reloads(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_failure_is_silent() {
        let generator = FakeGenerator::new("kernel", ShouldGenerate::Yes, Some(ErrorKind::Cancelled));
        let fixture = fixture(vec![], &[&generator]);
        let outcome = fixture.orchestrator.on_document_activated(&document()).await;
        assert_eq!(outcome.failed.len(), 1);
        assert!(fixture.notifier.shown().is_empty());
    }

    #[tokio::test]
    async fn test_saving_build_definition_invalidates() {
        let generator = FakeGenerator::new("platform2", ShouldGenerate::NoUnsupported, None);
        let fixture = fixture(vec![], &[&generator]);

        fixture.orchestrator.on_document_saved(&document()).await;
        assert_eq!(generator.invalidated.load(Ordering::Acquire), 0);
        let build_gn = Document::from_path("/src/src/platform2/codelab/BUILD.gn");
        fixture.orchestrator.on_document_saved(&build_gn).await;
        assert_eq!(generator.invalidated.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_configuration_change_resets_every_generator() {
        let platform2 = FakeGenerator::new("platform2", ShouldGenerate::Yes, None);
        let kernel = FakeGenerator::new("kernel", ShouldGenerate::Yes, None);
        let fixture = fixture(vec![], &[&platform2, &kernel]);
        fixture.orchestrator.on_configuration_changed();
        assert_eq!(platform2.resets.load(Ordering::Acquire), 1);
        assert_eq!(kernel.resets.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_completion_signal_per_cycle() {
        let generator = FakeGenerator::new("platform2", ShouldGenerate::Yes, Some(ErrorKind::ArtifactNotProduced));
        let fixture = fixture(vec![], &[&generator]);
        let mut completed = fixture.orchestrator.on_did_maybe_generate();

        fixture.orchestrator.on_document_activated(&document()).await;
        *generator.decision.lock() = ShouldGenerate::NoHasFailed;
        fixture.orchestrator.on_document_activated(&document()).await;
        assert!(completed.try_recv().is_ok());
        assert!(completed.try_recv().is_ok());
        assert!(completed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispose_cancels_in_flight_tokens() {
        let generator = FakeGenerator::new("platform2", ShouldGenerate::Yes, None);
        let fixture = fixture(vec![], &[&generator]);
        let token = fixture.orchestrator.cancel.child_token();
        fixture.orchestrator.dispose();
        assert!(token.is_cancelled());
    }

    /// Activation that takes a while, so concurrent dispatches all decide
    /// before any of them reaches its build.
    #[derive(Default)]
    struct SlowActivation(CountingReload);

    #[async_trait]
    impl IndexReloadTrigger for SlowActivation {
        async fn activate(&self) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.activate().await;
        }

        async fn reload(&self) {
            self.0.reload().await;
        }
    }

    struct Checkout {
        _temp_dir: tempfile::TempDir,
        source_root: PathBuf,
        sandbox: Arc<MockSandbox>,
        broken: Arc<AtomicBool>,
    }

    impl Checkout {
        /// Builds take `delay` and emit a complete codelab database for the
        /// board they target, or fail while `broken` is set.
        fn new(delay: Duration) -> Self {
            let temp_dir = tempfile::tempdir().unwrap();
            let source_root = temp_dir.path().join("chromiumos");
            let codelab = source_root.join("src/platform2/codelab");
            std::fs::create_dir_all(&codelab).unwrap();
            std::fs::write(codelab.join("codelab.cc"), "int main() {}").unwrap();

            let broken = Arc::new(AtomicBool::new(false));
            let failing = broken.clone();
            let database = serde_json::json!([{"directory": codelab, "file": "codelab.cc", "command": "clang++"}]);
            let sandbox = MockSandbox::new(temp_dir.path().join("chroot"))
                .with_delay(delay)
                .with_handler(move |call, chroot| {
                    if failing.load(Ordering::Acquire) {
                        return Ok(ExecOutput::failure(1, "emerge failed"));
                    }
                    let board = call.args[1].trim_start_matches("emerge-");
                    let dir = chroot
                        .join("build")
                        .join(board)
                        .join("tmp/portage/chromeos-base/codelab-9999/work/build/out/Default");
                    std::fs::create_dir_all(&dir).unwrap();
                    std::fs::write(dir.join(ARTIFACT_FILE_NAME), database.to_string()).unwrap();
                    Ok(ExecOutput::success(""))
                });
            Self { _temp_dir: temp_dir, source_root, sandbox: Arc::new(sandbox), broken }
        }

        fn orchestrator(&self, reload: ReloadHandle) -> Arc<Orchestrator> {
            let orchestrator =
                Orchestrator::new(Arc::new(RecordingOutput::default()), Arc::new(ScriptedNotifier::default()), reload);
            let mapper: MapperHandle = Arc::new(PackageTable::with_builtin(&self.source_root));
            orchestrator.register(vec![EbuildGenerator::factory(
                Family::Platform2,
                mapper,
                self.sandbox.clone(),
                &self.source_root,
                "brya",
            )]);
            Arc::new(orchestrator)
        }

        fn codelab_cc(&self) -> Document {
            Document::from_path(self.source_root.join("src/platform2/codelab/codelab.cc"))
        }

        fn builds(&self) -> Vec<String> {
            self.sandbox.calls().iter().map(|call| call.command_line()).collect()
        }
    }

    async fn decision(orchestrator: &Orchestrator, document: &Document) -> ShouldGenerate {
        orchestrator.decisions(document).await[0].1
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_events_build_a_package_once() {
        let checkout = Checkout::new(Duration::from_millis(200));
        let reload = Arc::new(SlowActivation::default());
        let orchestrator = checkout.orchestrator(reload.clone());

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let (orchestrator, document) = (orchestrator.clone(), checkout.codelab_cc());
                tokio::spawn(async move { orchestrator.on_document_activated(&document).await })
            })
            .collect();
        let mut generated = 0;
        for task in tasks {
            let outcome = task.await.unwrap();
            assert!(outcome.is_success(), "{outcome:?}");
            generated += outcome.generated.len();
        }

        assert_eq!(checkout.builds(), ["env USE=compdb_only emerge-brya codelab"]);
        assert_eq!(generated, 1);
        assert_eq!(reload.0.activations(), 1);
        assert_eq!(decision(&orchestrator, &checkout.codelab_cc()).await, ShouldGenerate::NoNeedNoChange);
    }

    #[tokio::test]
    async fn test_forced_retry_after_failure() {
        let checkout = Checkout::new(Duration::ZERO);
        let orchestrator = checkout.orchestrator(Arc::new(CountingReload::default()));
        let document = checkout.codelab_cc();

        checkout.broken.store(true, Ordering::Release);
        let outcome = orchestrator.on_document_activated(&document).await;
        assert!(matches!(outcome.failed.as_slice(), [(_, ErrorKind::RunBuildFailed(_))]));
        assert_eq!(decision(&orchestrator, &document).await, ShouldGenerate::NoHasFailed);
        assert_eq!(orchestrator.on_document_activated(&document).await, DispatchOutcome::default());
        assert_eq!(checkout.builds().len(), 1);

        checkout.broken.store(false, Ordering::Release);
        let outcome = orchestrator.force_generate(&document).await;
        assert_eq!(outcome.generated, ["platform2"]);
        assert_eq!(checkout.builds().len(), 2);
        assert_eq!(decision(&orchestrator, &document).await, ShouldGenerate::NoNeedNoChange);
    }

    #[tokio::test]
    async fn test_board_change_during_build() {
        let checkout = Checkout::new(Duration::from_millis(200));
        let orchestrator = checkout.orchestrator(Arc::new(CountingReload::default()));
        let document = checkout.codelab_cc();

        let in_flight = {
            let (orchestrator, document) = (orchestrator.clone(), document.clone());
            tokio::spawn(async move { orchestrator.on_document_activated(&document).await })
        };
        while checkout.builds().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(decision(&orchestrator, &document).await, ShouldGenerate::NoGenerating);
        orchestrator.on_board_changed("volteer");
        assert_eq!(decision(&orchestrator, &document).await, ShouldGenerate::Yes);

        // The old build still finishes, but its outcome no longer counts.
        assert_eq!(in_flight.await.unwrap().generated, ["platform2"]);
        assert_eq!(decision(&orchestrator, &document).await, ShouldGenerate::Yes);

        assert_eq!(orchestrator.on_document_activated(&document).await.generated, ["platform2"]);
        assert_eq!(
            checkout.builds(),
            ["env USE=compdb_only emerge-brya codelab", "env USE=compdb_only emerge-volteer codelab"]
        );
        assert_eq!(decision(&orchestrator, &document).await, ShouldGenerate::NoNeedNoChange);
    }
}
