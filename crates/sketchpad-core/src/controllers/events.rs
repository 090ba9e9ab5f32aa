use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::ChatError;
use crate::models::Document;

/// Progress notifications for whatever renders a conversation.
///
/// Every variant carries the conversation id known at the time so
/// subscribers can filter.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    StreamStarted {
        conversation_id: Option<String>,
    },
    PartialDocument {
        conversation_id: Option<String>,
        document: Document,
    },
    IdAssigned {
        conversation_id: String,
    },
    Settled {
        conversation_id: Option<String>,
    },
    Failed {
        conversation_id: Option<String>,
        message: String,
    },
    DemoUrlChanged {
        conversation_id: String,
        demo_url: String,
    },
    HandedOff {
        conversation_id: String,
    },
}

/// How one exchange ended, from the point of view of the controller driving it.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    Settled { conversation_id: Option<String> },
    Failed(ChatError),
    /// The live stream moved to the conversation view.
    HandedOff { conversation_id: String },
}

pub fn event_channel() -> (EventSink, UnboundedReceiver<ConversationEvent>) {
    let (tx, rx) = unbounded_channel();
    (EventSink(Some(tx)), rx)
}

/// Optional sender half. Dropped receivers are ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<UnboundedSender<ConversationEvent>>);

impl EventSink {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: ConversationEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
