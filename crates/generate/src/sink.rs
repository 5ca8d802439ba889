//! Surfaces the pipeline talks to but does not own: the build log, the
//! user-facing error surface, and the downstream index consumer.

use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type OutputHandle = Arc<dyn OutputSink>;
pub type NotifierHandle = Arc<dyn NotificationSink>;
pub type ReloadHandle = Arc<dyn IndexReloadTrigger>;

/// Log surface for build output.
pub trait OutputSink: Send + Sync {
    fn append_line(&self, line: &str);

    /// Bring the log in front of the user.
    fn show(&self) {}
}

/// Forwards every line to `tracing` under the `compdb::build` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingOutput;

impl OutputSink for TracingOutput {
    fn append_line(&self, line: &str) {
        tracing::info!(target: "compdb::build", "{line}");
    }
}

/// Buttons offered alongside a rendered error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorAction {
    /// Open an issue tracker at the given URL.
    ReportIssue(String),
    ShowLog,
    /// Stop showing this kind of error for the rest of the session.
    Ignore,
}

impl ErrorAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReportIssue(_) => "File a bug",
            Self::ShowLog => "Show Log",
            Self::Ignore => "Ignore",
        }
    }
}

impl Display for ErrorAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// User-facing error surface.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Show `message` with `actions` and wait for the user's choice. `None`
    /// when the message was dismissed.
    async fn show_error(&self, message: &str, actions: &[ErrorAction]) -> Option<ErrorAction>;

    async fn open_url(&self, url: &str) {
        tracing::info!(url, "Open in a browser to continue");
    }
}

/// The downstream cross-reference consumer (usually a C/C++ language
/// server) that reads the published databases.
#[async_trait]
pub trait IndexReloadTrigger: Send + Sync {
    /// Make sure the consumer is running. Called at most once per
    /// orchestrator, before the first generation.
    async fn activate(&self) {}

    /// Tell the consumer that a database changed on disk.
    async fn reload(&self);
}

/// Reload trigger for environments without a language server attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingReload;

#[async_trait]
impl IndexReloadTrigger for LoggingReload {
    async fn reload(&self) {
        tracing::debug!("Compilation database updated; index consumers should reload");
    }
}
