//! Recording collaborators for testing.

use crate::sink::{ErrorAction, IndexReloadTrigger, NotificationSink, OutputSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps every appended line.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    lines: Mutex<Vec<String>>,
    shown: AtomicUsize,
}

impl RecordingOutput {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// How many times the log was brought to the front.
    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::Acquire)
    }
}

impl OutputSink for RecordingOutput {
    fn append_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn show(&self) {
        self.shown.fetch_add(1, Ordering::AcqRel);
    }
}

/// One message shown through [`ScriptedNotifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShownError {
    pub message: String,
    pub actions: Vec<ErrorAction>,
}

/// Answers each `show_error` with the next scripted choice, or dismisses
/// the message once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedNotifier {
    choices: Mutex<VecDeque<Option<ErrorAction>>>,
    shown: Mutex<Vec<ShownError>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedNotifier {
    pub fn new(choices: impl IntoIterator<Item = Option<ErrorAction>>) -> Self {
        Self { choices: Mutex::new(choices.into_iter().collect()), ..Self::default() }
    }

    pub fn shown(&self) -> Vec<ShownError> {
        self.shown.lock().clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for ScriptedNotifier {
    async fn show_error(&self, message: &str, actions: &[ErrorAction]) -> Option<ErrorAction> {
        self.shown.lock().push(ShownError { message: message.to_string(), actions: actions.to_vec() });
        self.choices.lock().pop_front().flatten()
    }

    async fn open_url(&self, url: &str) {
        self.opened.lock().push(url.to_string());
    }
}

/// Counts activations and reloads.
#[derive(Debug, Default)]
pub struct CountingReload {
    activations: AtomicUsize,
    reloads: AtomicUsize,
}

impl CountingReload {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::Acquire)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::Acquire)
    }
}

#[async_trait]
impl IndexReloadTrigger for CountingReload {
    async fn activate(&self) {
        self.activations.fetch_add(1, Ordering::AcqRel);
    }

    async fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::AcqRel);
    }
}
