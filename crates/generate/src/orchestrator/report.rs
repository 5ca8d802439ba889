use crate::error::{Error, ErrorKind};
use crate::sink::{ErrorAction, NotificationSink, OutputSink};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Deref;

/// Where "File a bug" leads unless the orchestrator is told otherwise.
pub const DEFAULT_ISSUE_URL: &str = "https://issuetracker.google.com/issues/new";

type ErrorKey = (String, &'static str);

/// Renders generation errors, at most one on screen per
/// `(generator, kind)` and none at all once the user chose to ignore that
/// pair.
pub(crate) struct ErrorReporter {
    issue_url: String,
    ignored: Mutex<HashSet<ErrorKey>>,
    showing: Mutex<HashSet<ErrorKey>>,
    internal: Mutex<HashSet<&'static str>>,
}

/// Clears a key from the on-screen set when the message goes away, even if
/// the caller stopped waiting for it.
struct Showing<'a> {
    set: &'a Mutex<HashSet<ErrorKey>>,
    key: ErrorKey,
}

impl Drop for Showing<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

impl ErrorReporter {
    pub(crate) fn new(issue_url: impl Into<String>) -> Self {
        Self {
            issue_url: issue_url.into(),
            ignored: Mutex::new(HashSet::new()),
            showing: Mutex::new(HashSet::new()),
            internal: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn set_issue_url(&mut self, url: impl Into<String>) {
        self.issue_url = url.into();
    }

    fn actions(&self, kind: &ErrorKind) -> Vec<ErrorAction> {
        let mut actions = Vec::with_capacity(3);
        if matches!(kind, ErrorKind::ArtifactNotProduced) {
            actions.push(ErrorAction::ReportIssue(self.issue_url.clone()));
        }
        actions.extend([ErrorAction::ShowLog, ErrorAction::Ignore]);
        actions
    }

    /// Show `error` from `generator` unless it is cancelled, ignored, or
    /// already on screen. Returns the action the user picked.
    pub(crate) async fn report(
        &self,
        generator: &str,
        error: &Error,
        notifier: &dyn NotificationSink,
        output: &dyn OutputSink,
    ) -> Option<ErrorAction> {
        let kind = error.deref();
        if matches!(kind, ErrorKind::Cancelled) {
            tracing::info!(generator, "Generation cancelled");
            return None;
        }
        let key = (generator.to_string(), kind.kind_key());
        if self.ignored.lock().contains(&key) {
            tracing::debug!(generator, kind = key.1, error = %kind, "Suppressing ignored error");
            return None;
        }
        if !self.showing.lock().insert(key.clone()) {
            tracing::debug!(generator, kind = key.1, "Same error already on screen");
            return None;
        }
        let _showing = Showing { set: &self.showing, key: key.clone() };

        let message = format!("{generator}: {}", kind.user_message());
        let choice = notifier.show_error(&message, &self.actions(kind)).await;
        match &choice {
            Some(ErrorAction::ShowLog) => output.show(),
            Some(ErrorAction::Ignore) => {
                tracing::warn!(generator, kind = key.1, "Ignoring this error for the rest of the session");
                self.ignored.lock().insert(key);
            },
            Some(ErrorAction::ReportIssue(url)) => notifier.open_url(url).await,
            None => {},
        }
        choice
    }

    /// Show an internal diagnostic the first time `key` comes up; later
    /// calls with the same key only log.
    pub(crate) async fn report_once(
        &self,
        key: &'static str,
        message: &str,
        notifier: &dyn NotificationSink,
        output: &dyn OutputSink,
    ) {
        tracing::warn!(key, "{message}");
        if !self.internal.lock().insert(key) {
            return;
        }
        if let Some(ErrorAction::ShowLog) = notifier.show_error(message, &[ErrorAction::ShowLog]).await {
            output.show();
        }
    }
}
