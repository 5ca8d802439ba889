use async_trait::async_trait;
use compdb_generate::sink::{ErrorAction, NotificationSink};
use std::fmt::Write;

/// Prints errors to stderr. There is nobody to click a button, so no action
/// is ever selected.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalNotifier;

impl TerminalNotifier {
    pub fn render(message: &str, actions: &[ErrorAction]) -> String {
        let mut rendered = format!("error: {message}");
        for action in actions {
            if let ErrorAction::ReportIssue(url) = action {
                _ = write!(rendered, "\n  {}: {url}", action.label());
            }
        }
        rendered
    }
}

#[async_trait]
impl NotificationSink for TerminalNotifier {
    async fn show_error(&self, message: &str, actions: &[ErrorAction]) -> Option<ErrorAction> {
        eprintln!("{}", Self::render(message, actions));
        None
    }
}
