use std::io::Write;

use sketchpad_core::controllers::{
    ConversationEvent, NavigationEntry, Navigator, RecordingNavigator,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Shows address changes on the terminal and remembers them.
#[derive(Default)]
pub struct TerminalNavigator {
    history: RecordingNavigator,
}

impl TerminalNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the last `navigate` sent us, if the view was left.
    pub fn destination(&self) -> Option<String> {
        match self.history.last()? {
            NavigationEntry::Navigate(path) => Some(path),
            NavigationEntry::PushState(_) => None,
        }
    }
}

impl Navigator for TerminalNavigator {
    fn push_state(&self, path: &str) {
        eprintln!("[address {path}]");
        self.history.push_state(path);
    }

    fn navigate(&self, path: &str) {
        eprintln!("[opening {path}]");
        self.history.navigate(path);
    }
}

/// What to print so the terminal shows `text` when it already shows `printed`.
fn delta(printed: &str, text: &str) -> String {
    match text.strip_prefix(printed) {
        Some(rest) => rest.to_string(),
        // An earlier part changed shape; start the reply over on a fresh line.
        None => format!("\n{text}"),
    }
}

/// Print conversation progress until every sender is gone.
pub async fn print_events(mut events: UnboundedReceiver<ConversationEvent>) {
    let mut printed = String::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            ConversationEvent::StreamStarted { .. } => printed.clear(),
            ConversationEvent::PartialDocument { document, .. } => {
                let text = document.plain_text();
                print!("{}", delta(&printed, &text));
                let _ = stdout.flush();
                printed = text;
            }
            ConversationEvent::IdAssigned { conversation_id } => {
                eprintln!("[chat {conversation_id}]");
            }
            ConversationEvent::Settled { .. } => {
                if !printed.is_empty() {
                    println!();
                }
                printed.clear();
            }
            ConversationEvent::Failed { message, .. } => {
                eprintln!("\n{message}");
                printed.clear();
            }
            ConversationEvent::DemoUrlChanged { demo_url, .. } => {
                println!("Preview: {demo_url}");
            }
            ConversationEvent::HandedOff { conversation_id } => {
                eprintln!("[handing chat {conversation_id} to its view]");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_prints_only_new_text() {
        assert_eq!(delta("", "Here is "), "Here is ");
        assert_eq!(delta("Here is ", "Here is your page"), "your page");
        assert_eq!(delta("Here is", "Hello"), "\nHello");
    }

    #[test]
    fn test_destination_ignores_push_state() {
        let navigator = TerminalNavigator::new();
        navigator.push_state("/chats/a");
        assert!(navigator.destination().is_none());
        navigator.navigate("/chats/b");
        assert_eq!(navigator.destination().as_deref(), Some("/chats/b"));
    }
}
