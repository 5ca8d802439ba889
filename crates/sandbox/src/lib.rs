//! Build sandbox abstraction.
//!
//! Package builds happen inside a chroot. Everything that needs to run a
//! command there, or look at a file the build produced, goes through the
//! [`BuildSandbox`] trait so the rest of the pipeline never has to know
//! whether it is talking to `cros_sdk`, to a process already inside the
//! chroot, or to the in-memory [`MockSandbox`] used in tests.

mod chroot;
pub mod error;
#[cfg(feature = "mock")]
mod mock;

pub use crate::chroot::ChrootSandbox;
use crate::error::Result;
#[cfg(feature = "mock")]
pub use crate::mock::{ExecCall, MockSandbox};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type SandboxHandle = Arc<dyn BuildSandbox>;

/// Per-invocation knobs for [`BuildSandbox::exec`].
#[derive(Clone, Debug, Default)]
pub struct ExecOptions {
    /// Working directory inside the sandbox. Defaults to the sandbox's own.
    pub working_dir: Option<PathBuf>,
    /// Kill the process when this fires.
    pub cancel: Option<CancellationToken>,
}
impl ExecOptions {
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// What a finished command left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
impl ExecOutput {
    /// A zero-exit output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { exit_code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    /// A non-zero-exit output with the given stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code: Some(exit_code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Every line of stdout followed by every line of stderr.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// A place where build commands run.
///
/// # Exit Status
/// A command that ran to completion is always `Ok`, whatever its exit code.
/// `Err` is reserved for transport failures: the command could not be
/// launched, its output could not be read, or it was cancelled.
#[async_trait]
pub trait BuildSandbox: Send + Sync {
    /// Name used for logging only.
    fn name(&self) -> &str;

    /// Translate an absolute path inside the sandbox to the same file as
    /// seen from the host.
    fn host_path(&self, sandbox_path: &Path) -> PathBuf;

    /// Run `command` with `args` inside the sandbox and wait for it to exit.
    async fn exec(&self, command: &str, args: &[String], options: ExecOptions) -> Result<ExecOutput>;
}

/// Render a command line for logs, quoting arguments that contain spaces.
pub fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .map(|part| match part.contains(char::is_whitespace) {
            true => format!("'{part}'"),
            false => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("env", &[], "env")]
    #[case("env", &["USE=compdb_only", "emerge-brya", "codelab"], "env USE=compdb_only emerge-brya codelab")]
    #[case("env", &["USE=a b", "x"], "env 'USE=a b' x")]
    fn test_command_line(#[case] command: &str, #[case] args: &[&str], #[case] expected: &str) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        assert_eq!(command_line(command, &args), expected);
    }

    #[test]
    fn test_output_lines_and_status() {
        let output = ExecOutput { exit_code: Some(1), stdout: "a\nb".into(), stderr: "c\n".into() };
        assert!(!output.succeeded());
        assert_eq!(output.lines().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert!(ExecOutput::success("").succeeded());
        assert!(!ExecOutput { exit_code: None, ..Default::default() }.succeeded());
    }
}
