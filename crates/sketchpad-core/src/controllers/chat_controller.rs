use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::events::{ConversationEvent, EventSink, ExchangeOutcome};
use super::exchange::{Driven, Exchange};
use crate::ByteStream;
use crate::error::{ChatError, ErrorKind};
use crate::models::{Attachment, Conversation, SubmitRejected};
use crate::services::{ChatApi, ChatReply, HandoffRelay, MessageRequest};

/// How the conversation view got its initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mounted {
    /// A live stream was claimed from the relay; call [`ChatController::resume`].
    Handoff,
    /// Loaded from the canonical record.
    Canonical,
}

/// The per-conversation view.
pub struct ChatController {
    api: Arc<dyn ChatApi>,
    relay: HandoffRelay,
    events: EventSink,
    conversation: Conversation,
    pending_stream: Option<ByteStream>,
    background: Vec<JoinHandle<()>>,
}

impl ChatController {
    pub fn new(api: Arc<dyn ChatApi>, relay: HandoffRelay) -> Self {
        Self {
            api,
            relay,
            events: EventSink::none(),
            conversation: Conversation::new(),
            pending_stream: None,
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

    pub fn has_pending_stream(&self) -> bool {
        self.pending_stream.is_some()
    }

    /// Bind the view to `conversation_id`, taking over a handed-off stream when
    /// one is waiting for this conversation.
    pub async fn mount(&mut self, conversation_id: &str) -> Result<Mounted, ChatError> {
        self.conversation = Conversation::with_id(conversation_id);
        self.pending_stream = None;

        if let Some(handoff) = self.relay.claim(conversation_id) {
            // Replay the composer's submit so the state machine sees the usual transitions.
            self.conversation
                .submit(&handoff.pending_user_message, &[])
                .map_err(|rejected| ChatError::new(ErrorKind::BadRequest, rejected.to_string()))?;
            self.pending_stream = Some(handoff.stream);
            debug!(conv_id = %conversation_id, "Mounted from handoff");
            return Ok(Mounted::Handoff);
        }

        let detail = self.api.get_chat(conversation_id).await?;
        self.conversation.hydrate(&detail);
        if let Some(url) = self.conversation.demo_url() {
            self.events.emit(ConversationEvent::DemoUrlChanged {
                conversation_id: conversation_id.to_string(),
                demo_url: url.to_string(),
            });
        }
        debug!(conv_id = %conversation_id, messages = self.conversation.messages().len(), "Mounted from canonical record");
        Ok(Mounted::Canonical)
    }

    /// Drive a claimed stream to its end. `None` when nothing was claimed.
    pub async fn resume(&mut self) -> Option<ExchangeOutcome> {
        let stream = self.pending_stream.take()?;
        Some(self.drive(Ok(ChatReply::Stream(stream))).await)
    }

    pub async fn send_message(
        &mut self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<ExchangeOutcome, SubmitRejected> {
        let message = self.conversation.submit(text, attachments)?;
        let request = MessageRequest::streaming(message, attachments.to_vec());

        let reply = match self.conversation.id() {
            Some(id) => self.api.send_message(id, &request).await,
            None => self.api.create_chat(&request).await,
        };
        Ok(self.drive(reply).await)
    }

    /// Fold a fresh canonical record into the view.
    pub async fn refresh(&mut self) -> Result<(), ChatError> {
        let Some(id) = self.conversation.id().map(str::to_owned) else {
            return Err(ChatError::new(ErrorKind::NotFound, "No conversation is mounted."));
        };
        let detail = self.api.get_chat(&id).await?;
        if self.conversation.reconcile(&detail)
            && let Some(url) = self.conversation.demo_url()
        {
            self.events.emit(ConversationEvent::DemoUrlChanged {
                conversation_id: id,
                demo_url: url.to_string(),
            });
        }
        Ok(())
    }

    pub async fn wait_for_background(&mut self) {
        for task in self.background.drain(..) {
            let _ = task.await;
        }
    }

    async fn drive(&mut self, reply: Result<ChatReply, ChatError>) -> ExchangeOutcome {
        let mut exchange = Exchange::new(&self.api, &self.events, &mut self.background);
        match exchange.respond(&mut self.conversation, reply).await {
            Driven::Finished(outcome) => outcome,
            Driven::Detached {
                conversation_id, ..
            } => {
                warn!(conv_id = %conversation_id, "Conversation view cannot hand its stream on");
                ExchangeOutcome::HandedOff { conversation_id }
            }
        }
    }
}
