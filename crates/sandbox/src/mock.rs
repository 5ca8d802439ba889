//! Scripted sandbox for testing.

use crate::error::{ErrorKind, Result};
use crate::{BuildSandbox, ExecOptions, ExecOutput, command_line};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

type Handler = Box<dyn Fn(&ExecCall, &Path) -> Result<ExecOutput> + Send + Sync>;

/// One recorded [`BuildSandbox::exec`] invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecCall {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}
impl ExecCall {
    pub fn command_line(&self) -> String {
        command_line(&self.command, &self.args)
    }
}

/// Sandbox whose "chroot" is a plain directory and whose commands are a
/// closure.
///
/// Every call is recorded. The handler receives the host directory standing
/// in for the chroot root, so it can drop the files a real build would
/// produce. Without a handler every command succeeds with no output.
///
/// # Examples
///
/// ```
/// use compdb_sandbox::{BuildSandbox, ExecOptions, ExecOutput, MockSandbox};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let root = std::env::temp_dir();
/// let sandbox = MockSandbox::new(&root).with_handler(|call, _root| match call.command.as_str() {
///     "true" => Ok(ExecOutput::success("")),
///     _ => Ok(ExecOutput::failure(127, "command not found")),
/// });
/// let output = sandbox.exec("false", &[], ExecOptions::default()).await?;
/// assert_eq!(output.exit_code, Some(127));
/// assert_eq!(sandbox.calls().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockSandbox {
    root: PathBuf,
    delay: Option<Duration>,
    handler: Handler,
    calls: Mutex<Vec<ExecCall>>,
}

impl MockSandbox {
    /// Create a sandbox rooted at `root` (usually a `tempfile::TempDir`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            delay: None,
            handler: Box::new(|_, _| Ok(ExecOutput::success(""))),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Decide the outcome of each command.
    pub fn with_handler(mut self, handler: impl Fn(&ExecCall, &Path) -> Result<ExecOutput> + Send + Sync + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Make every command take `delay` before the handler runs. Cancellation
    /// is honoured while waiting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Host directory standing in for `/` of the sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BuildSandbox for MockSandbox {
    fn name(&self) -> &str {
        "mock"
    }

    fn host_path(&self, sandbox_path: &Path) -> PathBuf {
        self.root.join(sandbox_path.strip_prefix("/").unwrap_or(sandbox_path))
    }

    async fn exec(&self, command: &str, args: &[String], options: ExecOptions) -> Result<ExecOutput> {
        let call = ExecCall { command: command.to_string(), args: args.to_vec(), working_dir: options.working_dir };
        self.calls.lock().push(call.clone());

        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            }
        }
        (self.handler)(&call, &self.root)
    }
}
