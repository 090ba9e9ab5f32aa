use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use super::events::{ConversationEvent, EventSink, ExchangeOutcome};
use super::exchange::{Driven, Exchange};
use super::navigator::{Navigator, chat_path};
use crate::models::{Attachment, Conversation, SubmitRejected};
use crate::services::{ChatApi, Handoff, HandoffRelay, MessageRequest};

/// What the composer does once a new conversation has an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationMode {
    /// Rewrite the address to the conversation and keep streaming here.
    #[default]
    InPlace,
    /// Hand the live stream to the conversation view and go there.
    Handoff,
}

/// The id-less composer view: starts conversations and follows them until
/// they get a permanent address.
pub struct ComposerController {
    api: Arc<dyn ChatApi>,
    navigator: Arc<dyn Navigator>,
    relay: HandoffRelay,
    mode: NavigationMode,
    events: EventSink,
    conversation: Conversation,
    background: Vec<JoinHandle<()>>,
}

impl ComposerController {
    pub fn new(
        api: Arc<dyn ChatApi>,
        navigator: Arc<dyn Navigator>,
        relay: HandoffRelay,
        mode: NavigationMode,
    ) -> Self {
        Self {
            api,
            navigator,
            relay,
            mode,
            events: EventSink::none(),
            conversation: Conversation::new(),
            background: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    /// Start over with an empty conversation. A published handoff is left alone.
    pub fn reset(&mut self) {
        self.conversation = Conversation::new();
    }

    /// Send the prompt: creates the conversation on the first call, continues it after.
    pub async fn submit(
        &mut self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<ExchangeOutcome, SubmitRejected> {
        let message = self.conversation.submit(text, attachments)?;
        let request = MessageRequest::streaming(message.clone(), attachments.to_vec());

        let reply = match self.conversation.id() {
            None => self.api.create_chat(&request).await,
            Some(id) => self.api.send_message(id, &request).await,
        };

        let mut exchange = Exchange::new(&self.api, &self.events, &mut self.background)
            .announcing(self.navigator.as_ref(), self.mode);
        let driven = exchange.respond(&mut self.conversation, reply).await;
        let navigated = exchange.navigated();

        match driven {
            Driven::Detached {
                conversation_id,
                stream,
            } => {
                self.relay.publish(Handoff {
                    conversation_id: conversation_id.clone(),
                    pending_user_message: message,
                    stream,
                });
                info!(conv_id = %conversation_id, "Handing stream to conversation view");
                self.navigator.navigate(&chat_path(&conversation_id));
                self.events.emit(ConversationEvent::HandedOff {
                    conversation_id: conversation_id.clone(),
                });
                // The view is gone; its provisional messages go with it.
                self.conversation = Conversation::new();
                Ok(ExchangeOutcome::HandedOff { conversation_id })
            }
            Driven::Finished(outcome) => {
                if navigated {
                    self.conversation = Conversation::new();
                }
                Ok(outcome)
            }
        }
    }

    /// Wait for fire-and-forget work such as ownership recording.
    pub async fn wait_for_background(&mut self) {
        for task in self.background.drain(..) {
            let _ = task.await;
        }
    }
}
