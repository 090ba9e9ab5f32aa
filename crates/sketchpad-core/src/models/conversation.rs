use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

use super::attachment::{Attachment, PreflightError, preflight};
use super::chat_detail::{ChatDetail, MessageContent, Role};
use super::document::Document;
use crate::error::ChatError;

/// Per-exchange lifecycle of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    AwaitingProvider,
    Streaming,
    Settled,
    Failed,
}

/// Ties chunk updates to the message that was in flight when the stream began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StreamHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    in_flight: bool,
    stream_handle: Option<StreamHandle>,
    error: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::settled(Role::User, MessageContent::Text(text.into()))
    }

    pub fn settled(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            in_flight: false,
            stream_handle: None,
            error: None,
        }
    }

    fn streaming(handle: StreamHandle) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Document(Document::new()),
            in_flight: true,
            stream_handle: Some(handle),
            error: None,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(message.clone()),
            in_flight: false,
            stream_handle: None,
            error: Some(message),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn stream_handle(&self) -> Option<StreamHandle> {
        self.stream_handle
    }

    /// User-facing failure text when this message ended an exchange that failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    #[error("a reply is still streaming")]
    InFlight,

    #[error("still waiting for the provider to answer")]
    AwaitingProvider,

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Preflight(#[from] PreflightError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("no request is waiting on the provider")]
    NotAwaiting,

    #[error("stream handle does not belong to the in-flight message")]
    StaleHandle,
}

/// One chat thread: its ordered messages, the provider id once known, and the
/// preview location.
///
/// At most one message is in flight and it is always the last one. The id is
/// set at most once.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: Option<String>,
    messages: Vec<Message>,
    demo_url: Option<String>,
    state: ExchangeState,
    id_before_exchange: Option<String>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// A fresh id-less conversation, as on the composer view.
    pub fn new() -> Self {
        Self {
            id: None,
            messages: Vec::new(),
            demo_url: None,
            state: ExchangeState::Idle,
            id_before_exchange: None,
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn demo_url(&self) -> Option<&str> {
        self.demo_url.as_deref()
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// True only while nothing has come back yet. Streaming content replaces
    /// the spinner as soon as the first chunk lands.
    pub fn is_loading(&self) -> bool {
        self.state == ExchangeState::AwaitingProvider
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight().is_some()
    }

    pub fn in_flight(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.in_flight)
    }

    fn in_flight_mut(&mut self, handle: StreamHandle) -> Result<&mut Message, TransitionError> {
        match self.messages.last_mut() {
            Some(m) if m.in_flight && m.stream_handle == Some(handle) => Ok(m),
            _ => Err(TransitionError::StaleHandle),
        }
    }

    /// Append a user message and wait on the provider. Returns the trimmed text
    /// to send.
    ///
    /// Nothing changes when the submission is rejected.
    pub fn submit(
        &mut self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<String, SubmitRejected> {
        if self.is_streaming() {
            return Err(SubmitRejected::InFlight);
        }
        if self.state == ExchangeState::AwaitingProvider {
            return Err(SubmitRejected::AwaitingProvider);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitRejected::EmptyMessage);
        }
        if self.id.is_none() {
            preflight(attachments)?;
        }

        self.messages.push(Message::user(text));
        self.state = ExchangeState::AwaitingProvider;
        self.id_before_exchange = self.id.clone();
        Ok(text.to_string())
    }

    /// The provider answered with a byte stream: open the in-flight assistant message.
    pub fn begin_stream(&mut self) -> Result<StreamHandle, TransitionError> {
        if self.state != ExchangeState::AwaitingProvider {
            return Err(TransitionError::NotAwaiting);
        }
        let handle = StreamHandle::next();
        self.messages.push(Message::streaming(handle));
        self.state = ExchangeState::Streaming;
        debug!(conv_id = ?self.id, handle = handle.0, "Stream started");
        Ok(handle)
    }

    /// Replace the in-flight content with the latest cumulative document.
    pub fn apply_partial(
        &mut self,
        handle: StreamHandle,
        document: &Document,
    ) -> Result<(), TransitionError> {
        let message = self.in_flight_mut(handle)?;
        message.content = MessageContent::Document(document.clone());
        Ok(())
    }

    /// Record the provider-assigned id. Returns true when the id was newly set.
    ///
    /// Once set the id never changes; a different id is ignored.
    pub fn assign_id(&mut self, id: &str) -> bool {
        match &self.id {
            None if !id.is_empty() => {
                debug!(conv_id = %id, "Conversation id assigned");
                self.id = Some(id.to_string());
                true
            }
            Some(existing) if existing != id => {
                warn!(conv_id = %existing, ignored = %id, "Ignoring second conversation id");
                false
            }
            _ => false,
        }
    }

    /// Finalize the in-flight message. Returns the id to reconcile against.
    ///
    /// When the conversation had no id before this exchange and none arrived
    /// as metadata, the final document is searched for one.
    pub fn complete_stream(
        &mut self,
        handle: StreamHandle,
        document: Document,
    ) -> Result<Option<String>, TransitionError> {
        let had_id = self.id_before_exchange.is_some();
        let message = self.in_flight_mut(handle)?;
        message.in_flight = false;
        message.stream_handle = None;
        message.content = MessageContent::Document(document);
        self.state = ExchangeState::Settled;

        let found = if !had_id && self.id.is_none() {
            self.messages
                .last()
                .and_then(|m| m.content.as_document())
                .and_then(Document::find_conversation_id)
        } else {
            None
        };
        if let Some(found) = found {
            self.assign_id(&found);
        }

        debug!(conv_id = ?self.id, "Stream settled");
        Ok(self.id.clone())
    }

    /// End the stream as failed, keeping whatever partial document arrived.
    pub fn fail_stream(
        &mut self,
        handle: StreamHandle,
        error: &ChatError,
        partial: Document,
    ) -> Result<(), TransitionError> {
        let text = error.user_message();
        let message = self.in_flight_mut(handle)?;
        message.in_flight = false;
        message.stream_handle = None;
        message.content = if partial.is_empty() {
            MessageContent::Text(text.clone())
        } else {
            MessageContent::Document(partial)
        };
        message.error = Some(text);
        self.state = ExchangeState::Failed;
        warn!(conv_id = ?self.id, error = %error, "Stream failed");
        Ok(())
    }

    /// The request itself failed before any reply arrived.
    pub fn fail_request(&mut self, error: &ChatError) -> Result<(), TransitionError> {
        if self.state != ExchangeState::AwaitingProvider {
            return Err(TransitionError::NotAwaiting);
        }
        self.messages.push(Message::failure(error.user_message()));
        self.state = ExchangeState::Failed;
        warn!(conv_id = ?self.id, error = %error, "Request failed");
        Ok(())
    }

    /// The provider answered with a finished record instead of a stream.
    pub fn settle_with_detail(&mut self, detail: &ChatDetail) -> Result<(), TransitionError> {
        if self.state != ExchangeState::AwaitingProvider {
            return Err(TransitionError::NotAwaiting);
        }
        self.assign_id(&detail.id);
        if let Some(url) = detail.demo_url() {
            self.demo_url = Some(url.to_string());
        }

        let reply = detail
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content())
            .unwrap_or_else(|| MessageContent::Document(Document::new()));
        self.messages.push(Message::settled(Role::Assistant, reply));
        self.state = ExchangeState::Settled;
        Ok(())
    }

    /// Fold a canonical re-fetch into the conversation.
    ///
    /// The preview URL always follows the record. Local messages are final and
    /// stay as they are; the record only contributes messages past the end of
    /// the local history, and nothing is added while a reply is in flight.
    pub fn reconcile(&mut self, detail: &ChatDetail) -> bool {
        self.assign_id(&detail.id);

        let mut demo_changed = false;
        if let Some(url) = detail.demo_url()
            && self.demo_url.as_deref() != Some(url)
        {
            self.demo_url = Some(url.to_string());
            demo_changed = true;
        }

        if !self.is_streaming() && detail.messages.len() > self.messages.len() {
            let known = self.messages.len();
            self.messages.extend(
                detail.messages[known..]
                    .iter()
                    .map(|m| Message::settled(m.role, m.content())),
            );
        }
        demo_changed
    }

    /// Load a conversation view straight from the canonical record.
    pub fn hydrate(&mut self, detail: &ChatDetail) {
        self.assign_id(&detail.id);
        self.demo_url = detail.demo_url().map(str::to_owned);
        self.messages = messages_from_detail(detail);
        self.state = ExchangeState::Idle;
    }

    pub fn plain_transcript(&self) -> Vec<(Role, String)> {
        self.messages
            .iter()
            .map(|m| (m.role, m.content.plain_text()))
            .collect()
    }
}

fn messages_from_detail(detail: &ChatDetail) -> Vec<Message> {
    detail
        .messages
        .iter()
        .map(|m| Message::settled(m.role, m.content()))
        .collect()
}
