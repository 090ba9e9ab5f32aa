use parking_lot::Mutex;

/// Route of the per-conversation view.
pub fn chat_path(conversation_id: &str) -> String {
    format!("/chats/{conversation_id}")
}

/// How a view changes the current location.
pub trait Navigator: Send + Sync {
    /// Rewrite the address without leaving the current view.
    fn push_state(&self, path: &str);

    /// Leave the current view for the one at `path`.
    fn navigate(&self, path: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEntry {
    PushState(String),
    Navigate(String),
}

/// Navigator that only remembers where it was sent.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    entries: Mutex<Vec<NavigationEntry>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<NavigationEntry> {
        self.entries.lock().clone()
    }

    pub fn last(&self) -> Option<NavigationEntry> {
        self.entries.lock().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn push_state(&self, path: &str) {
        self.entries
            .lock()
            .push(NavigationEntry::PushState(path.to_string()));
    }

    fn navigate(&self, path: &str) {
        self.entries
            .lock()
            .push(NavigationEntry::Navigate(path.to_string()));
    }
}
