use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::composer_controller::NavigationMode;
use super::events::{ConversationEvent, EventSink, ExchangeOutcome};
use super::navigator::{Navigator, chat_path};
use crate::ByteStream;
use crate::error::{ChatError, ErrorKind};
use crate::models::{Conversation, Document, Metadata, StreamHandle};
use crate::services::{
    ChatApi, ChatReply, ConsumeOutcome, RecordingStream, RecordingSwitch, StreamConsumer, StreamError,
    StreamObserver,
};

/// Where a freshly learned conversation id should take the view.
pub(crate) struct Announce<'a> {
    navigator: &'a dyn Navigator,
    mode: NavigationMode,
}

pub(crate) enum Driven {
    Finished(ExchangeOutcome),
    /// The stream was cut loose at the first id announcement; `stream`
    /// replays it from its first byte.
    Detached {
        conversation_id: String,
        stream: ByteStream,
    },
}

/// One request/response cycle driven into a [`Conversation`].
pub(crate) struct Exchange<'a> {
    api: &'a Arc<dyn ChatApi>,
    events: &'a EventSink,
    announce: Option<Announce<'a>>,
    background: &'a mut Vec<JoinHandle<()>>,
    announced: bool,
    navigated: bool,
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(
        api: &'a Arc<dyn ChatApi>,
        events: &'a EventSink,
        background: &'a mut Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            api,
            events,
            announce: None,
            background,
            announced: false,
            navigated: false,
        }
    }

    /// Act on the conversation id when it first shows up: claim ownership and move the view.
    pub(crate) fn announcing(mut self, navigator: &'a dyn Navigator, mode: NavigationMode) -> Self {
        self.announce = Some(Announce { navigator, mode });
        self
    }

    /// True when the view was sent elsewhere during the exchange.
    pub(crate) fn navigated(&self) -> bool {
        self.navigated
    }

    pub(crate) async fn respond(
        &mut self,
        conversation: &mut Conversation,
        reply: Result<ChatReply, ChatError>,
    ) -> Driven {
        match reply {
            Err(err) => {
                if let Err(transition) = conversation.fail_request(&err) {
                    warn!(error = %transition, "Request failure arrived in an unexpected state");
                }
                self.emit_failed(conversation, &err);
                Driven::Finished(ExchangeOutcome::Failed(err))
            }
            Ok(ChatReply::Document(detail)) => {
                let had_id = conversation.id().is_some();
                if let Err(transition) = conversation.settle_with_detail(&detail) {
                    let err = ChatError::new(ErrorKind::Internal, transition.to_string());
                    return Driven::Finished(ExchangeOutcome::Failed(err));
                }
                if !had_id && let Some(id) = conversation.id().map(str::to_owned) {
                    self.events.emit(ConversationEvent::IdAssigned {
                        conversation_id: id.clone(),
                    });
                    // The backend already recorded ownership for a finished reply.
                    if self.announce_id(&id, false, false).is_break() {
                        debug!(conv_id = %id, "Finished reply has no stream to hand off");
                    }
                }
                self.emit_demo_url(conversation);
                self.emit_settled(conversation)
            }
            Ok(ChatReply::Stream(stream)) => self.drive_stream(conversation, stream).await,
        }
    }

    async fn drive_stream(&mut self, conversation: &mut Conversation, stream: ByteStream) -> Driven {
        let had_id = conversation.id().is_some();
        let handle = match conversation.begin_stream() {
            Ok(handle) => handle,
            Err(transition) => {
                let err = ChatError::new(ErrorKind::Internal, transition.to_string());
                return Driven::Finished(ExchangeOutcome::Failed(err));
            }
        };
        self.events.emit(ConversationEvent::StreamStarted {
            conversation_id: conversation.id().map(str::to_owned),
        });

        let recording = self.recording(had_id, stream);
        let mut observer = ExchangeObserver {
            recording: recording.switch(),
            exchange: &mut *self,
            conversation: &mut *conversation,
            handle,
            detach_to: None,
            reconcile_id: None,
            assigned_by_metadata: false,
        };
        let outcome = StreamConsumer::new()
            .consume(recording, &mut observer)
            .await;
        let ExchangeObserver {
            detach_to,
            reconcile_id,
            assigned_by_metadata,
            ..
        } = observer;

        match outcome {
            ConsumeOutcome::Detached(recording) => match detach_to {
                Some(conversation_id) => Driven::Detached {
                    conversation_id,
                    stream: recording.into_replay(),
                },
                None => Driven::Finished(ExchangeOutcome::Failed(ChatError::new(
                    ErrorKind::Internal,
                    "stream detached without a destination",
                ))),
            },
            ConsumeOutcome::Failed(err, _) => {
                let err = err.to_chat_error();
                self.emit_failed(conversation, &err);
                Driven::Finished(ExchangeOutcome::Failed(err))
            }
            ConsumeOutcome::Completed(_) => {
                if !had_id
                    && !assigned_by_metadata
                    && let Some(id) = conversation.id().map(str::to_owned)
                {
                    debug!(conv_id = %id, "Conversation id found in final document");
                    self.events.emit(ConversationEvent::IdAssigned {
                        conversation_id: id.clone(),
                    });
                    if self.announce_id(&id, true, false).is_break() {
                        debug!(conv_id = %id, "Stream already ended, nothing to hand off");
                    }
                }
                if let Some(id) = reconcile_id {
                    self.reconcile(conversation, &id).await;
                }
                self.emit_settled(conversation)
            }
        }
    }

    /// Wrap the reply stream. Frames are kept only while the exchange could
    /// still hand the stream to another view.
    pub(crate) fn recording(&self, had_id: bool, stream: ByteStream) -> RecordingStream<ByteStream> {
        let may_detach = !had_id
            && !self.announced
            && self
                .announce
                .as_ref()
                .is_some_and(|a| a.mode == NavigationMode::Handoff);
        if may_detach {
            RecordingStream::new(stream)
        } else {
            RecordingStream::passthrough(stream)
        }
    }

    /// Re-fetch the canonical record and fold it in. Failures only cost the
    /// preview URL, so they are logged and swallowed.
    pub(crate) async fn reconcile(&self, conversation: &mut Conversation, id: &str) {
        match self.api.get_chat(id).await {
            Ok(detail) => {
                if conversation.reconcile(&detail) {
                    self.emit_demo_url(conversation);
                }
            }
            Err(err) => warn!(conv_id = %id, error = %err, "Canonical re-fetch failed"),
        }
    }

    fn announce_id(&mut self, id: &str, record_ownership: bool, detachable: bool) -> ControlFlow<()> {
        let Some(announce) = &self.announce else {
            return ControlFlow::Continue(());
        };
        if self.announced {
            return ControlFlow::Continue(());
        }
        self.announced = true;

        if record_ownership {
            let api = Arc::clone(self.api);
            let conv_id = id.to_string();
            self.background.push(tokio::spawn(async move {
                if let Err(err) = api.record_ownership(&conv_id).await {
                    warn!(conv_id = %conv_id, error = %err, "Failed to record chat ownership");
                }
            }));
        }

        let path = chat_path(id);
        match announce.mode {
            NavigationMode::InPlace => {
                announce.navigator.push_state(&path);
                ControlFlow::Continue(())
            }
            NavigationMode::Handoff if detachable => ControlFlow::Break(()),
            NavigationMode::Handoff => {
                announce.navigator.navigate(&path);
                self.navigated = true;
                ControlFlow::Continue(())
            }
        }
    }

    fn emit_demo_url(&self, conversation: &Conversation) {
        if let (Some(id), Some(url)) = (conversation.id(), conversation.demo_url()) {
            self.events.emit(ConversationEvent::DemoUrlChanged {
                conversation_id: id.to_string(),
                demo_url: url.to_string(),
            });
        }
    }

    fn emit_failed(&self, conversation: &Conversation, err: &ChatError) {
        self.events.emit(ConversationEvent::Failed {
            conversation_id: conversation.id().map(str::to_owned),
            message: err.user_message(),
        });
    }

    fn emit_settled(&self, conversation: &Conversation) -> Driven {
        let conversation_id = conversation.id().map(str::to_owned);
        self.events.emit(ConversationEvent::Settled {
            conversation_id: conversation_id.clone(),
        });
        Driven::Finished(ExchangeOutcome::Settled { conversation_id })
    }
}

struct ExchangeObserver<'e, 'a> {
    recording: RecordingSwitch,
    exchange: &'e mut Exchange<'a>,
    conversation: &'e mut Conversation,
    handle: StreamHandle,
    detach_to: Option<String>,
    reconcile_id: Option<String>,
    assigned_by_metadata: bool,
}

impl StreamObserver for ExchangeObserver<'_, '_> {
    fn on_chunk(&mut self, document: &Document) {
        if let Err(err) = self.conversation.apply_partial(self.handle, document) {
            warn!(error = %err, "Dropping chunk for a finished message");
            return;
        }
        self.exchange.events.emit(ConversationEvent::PartialDocument {
            conversation_id: self.conversation.id().map(str::to_owned),
            document: document.clone(),
        });
    }

    fn on_metadata(&mut self, metadata: &Metadata) -> ControlFlow<()> {
        let Some(id) = metadata.conversation_id() else {
            return ControlFlow::Continue(());
        };
        if !self.conversation.assign_id(id) {
            return ControlFlow::Continue(());
        }
        self.assigned_by_metadata = true;
        self.exchange.events.emit(ConversationEvent::IdAssigned {
            conversation_id: id.to_string(),
        });

        let flow = self.exchange.announce_id(id, true, true);
        match flow {
            ControlFlow::Break(()) => self.detach_to = Some(id.to_string()),
            // The stream stays here, so nothing will ever be replayed.
            ControlFlow::Continue(()) => self.recording.stop(),
        }
        flow
    }

    fn on_complete(&mut self, document: &Document) {
        match self.conversation.complete_stream(self.handle, document.clone()) {
            Ok(id) => self.reconcile_id = id,
            Err(err) => warn!(error = %err, "Stream completed for a finished message"),
        }
    }

    fn on_error(&mut self, error: &StreamError, partial: &Document) {
        if let Err(err) = self
            .conversation
            .fail_stream(self.handle, &error.to_chat_error(), partial.clone())
        {
            warn!(error = %err, "Stream failed for a finished message");
        }
    }
}
