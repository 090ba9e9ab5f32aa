use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::ByteStream;

/// A live reply passed from the view that started it to the view that will show it.
pub struct Handoff {
    pub conversation_id: String,
    pub pending_user_message: String,
    pub stream: ByteStream,
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("conversation_id", &self.conversation_id)
            .field("pending_user_message", &self.pending_user_message)
            .finish_non_exhaustive()
    }
}

/// Application-wide slot that carries at most one [`Handoff`] across a navigation.
///
/// Clones share the same slot. Publishing overwrites an unclaimed handoff, and
/// claiming checks the id and empties the slot under one lock so a stream can
/// only ever have one reader.
#[derive(Clone, Default)]
pub struct HandoffRelay {
    slot: Arc<Mutex<Option<Handoff>>>,
}

impl HandoffRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, handoff: Handoff) {
        let conv_id = handoff.conversation_id.clone();
        if let Some(previous) = self.slot.lock().replace(handoff) {
            debug!(
                conv_id = %previous.conversation_id,
                "Discarding unclaimed handoff"
            );
        }
        debug!(conv_id = %conv_id, "Handoff published");
    }

    /// Take the handoff if it belongs to `conversation_id`. A handoff for
    /// another conversation stays where it is.
    pub fn claim(&self, conversation_id: &str) -> Option<Handoff> {
        let mut slot = self.slot.lock();
        if slot
            .as_ref()
            .is_some_and(|h| h.conversation_id == conversation_id)
        {
            debug!(conv_id = %conversation_id, "Handoff claimed");
            return slot.take();
        }
        None
    }

    /// Drop whatever is in the slot. Returns true when something was dropped.
    pub fn clear(&self) -> bool {
        self.slot.lock().take().is_some()
    }

    pub fn pending_conversation_id(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|h| h.conversation_id.clone())
    }
}

impl std::fmt::Debug for HandoffRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffRelay")
            .field("pending", &self.pending_conversation_id())
            .finish()
    }
}
