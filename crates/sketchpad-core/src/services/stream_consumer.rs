use std::collections::HashSet;
use std::ops::ControlFlow;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use super::sse_decoder::{SseDecoder, SseError, SseUnit};
use crate::error::{ChatError, TransportError};
use crate::models::document::{Chunk, Document, DocumentError, Metadata};

/// Data payload some providers send before closing the stream. Carries nothing.
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error(transparent)]
    Framing(#[from] SseError),

    #[error("chunk is not valid JSON: {0}")]
    InvalidJson(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl StreamError {
    pub fn to_chat_error(&self) -> ChatError {
        match self {
            StreamError::Transport(err) => ChatError::offline(err),
            other => ChatError::malformed(other.to_string()),
        }
    }
}

/// Callbacks driven by a [`StreamConsumer`], in strict arrival order.
///
/// `on_complete` and `on_error` are terminal: exactly one of them fires and
/// nothing fires afterwards.
pub trait StreamObserver: Send {
    /// The document grew. Receives the cumulative state.
    fn on_chunk(&mut self, _document: &Document) {}

    /// A metadata key was seen for the first time. `Break` detaches the
    /// consumer from the stream without a terminal callback.
    fn on_metadata(&mut self, _metadata: &Metadata) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_complete(&mut self, _document: &Document) {}

    /// Receives the partial document built before the failure.
    fn on_error(&mut self, _error: &StreamError, _partial: &Document) {}
}

#[derive(Debug)]
pub enum Progress {
    Continue,
    Detached,
    Failed(StreamError),
}

/// How a call to [`StreamConsumer::consume`] ended.
pub enum ConsumeOutcome<S> {
    Completed(Document),
    Failed(StreamError, Document),
    /// The observer asked to stop; the stream is handed back unread past this point.
    Detached(S),
}

impl<S> std::fmt::Debug for ConsumeOutcome<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumeOutcome::Completed(doc) => f.debug_tuple("Completed").field(doc).finish(),
            ConsumeOutcome::Failed(err, doc) => {
                f.debug_tuple("Failed").field(err).field(doc).finish()
            }
            ConsumeOutcome::Detached(_) => f.write_str("Detached"),
        }
    }
}

/// Turns the raw bytes of one streamed reply into document updates.
///
/// One consumer per stream: chunks are applied exactly once, in order.
#[derive(Debug, Default)]
pub struct StreamConsumer {
    decoder: SseDecoder,
    document: Document,
    seen_metadata: HashSet<String>,
    seen_ids: HashSet<String>,
    chunks_applied: usize,
    terminated: bool,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_unit_bytes(max_unit_bytes: usize) -> Self {
        Self {
            decoder: SseDecoder::with_max_unit_bytes(max_unit_bytes),
            ..Self::default()
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn chunks_applied(&self) -> usize {
        self.chunks_applied
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed one frame of bytes.
    pub fn push<O: StreamObserver + ?Sized>(&mut self, frame: &[u8], observer: &mut O) -> Progress {
        if self.terminated {
            return Progress::Continue;
        }

        let units = match self.decoder.push(frame) {
            Ok(units) => units,
            Err(err) => return self.fail(err.into(), observer),
        };

        for unit in units {
            match self.handle_unit(unit, observer) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => return Progress::Detached,
                Err(err) => return self.fail(err, observer),
            }
        }
        Progress::Continue
    }

    /// Signal end of data. Fires `on_complete` unless a trailing unit is malformed.
    pub fn finish<O: StreamObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> Result<&Document, StreamError> {
        if self.terminated {
            return Ok(&self.document);
        }

        let tail = match self.decoder.finish() {
            Ok(tail) => tail,
            Err(err) => {
                let err = StreamError::from(err);
                self.fail(err.clone(), observer);
                return Err(err);
            }
        };
        if let Some(unit) = tail {
            // A detach request this late has nothing left to hand over.
            if let Err(err) = self.handle_unit(unit, observer) {
                self.fail(err.clone(), observer);
                return Err(err);
            }
        }

        self.terminated = true;
        debug!(chunks = self.chunks_applied, "Stream completed");
        observer.on_complete(&self.document);
        Ok(&self.document)
    }

    /// Terminate on an error from outside the decoder, such as the transport.
    pub fn fail<O: StreamObserver + ?Sized>(&mut self, error: StreamError, observer: &mut O) -> Progress {
        if self.terminated {
            return Progress::Failed(error);
        }
        self.terminated = true;
        warn!(error = %error, chunks = self.chunks_applied, "Stream failed");
        observer.on_error(&error, &self.document);
        Progress::Failed(error)
    }

    /// Drive a whole byte stream to its end, a failure, or a detach request.
    pub async fn consume<S, O>(mut self, mut stream: S, observer: &mut O) -> ConsumeOutcome<S>
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
        O: StreamObserver + ?Sized,
    {
        while let Some(frame) = stream.next().await {
            let progress = match frame {
                Ok(bytes) => self.push(&bytes, observer),
                Err(err) => self.fail(err.into(), observer),
            };
            match progress {
                Progress::Continue => {}
                Progress::Detached => return ConsumeOutcome::Detached(stream),
                Progress::Failed(err) => return ConsumeOutcome::Failed(err, self.document),
            }
        }

        if let Err(err) = self.finish(observer).map(|_| ()) {
            return ConsumeOutcome::Failed(err, self.document);
        }
        ConsumeOutcome::Completed(self.document)
    }

    fn handle_unit<O: StreamObserver + ?Sized>(
        &mut self,
        unit: SseUnit,
        observer: &mut O,
    ) -> Result<ControlFlow<()>, StreamError> {
        let payload = unit.data.trim();
        if payload.is_empty() || payload == DONE_MARKER {
            return Ok(ControlFlow::Continue(()));
        }

        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| StreamError::InvalidJson(e.to_string()))?;
        match Chunk::from_json(value, unit.event.as_deref())? {
            Chunk::Metadata(metadata) => {
                // Keyless payloads share a fallback key, so a newly named
                // conversation id is delivered even when the key repeats.
                let fresh_key = self.seen_metadata.insert(metadata.key.clone());
                let fresh_id = metadata
                    .conversation_id()
                    .is_some_and(|id| self.seen_ids.insert(id.to_string()));
                if !fresh_key && !fresh_id {
                    return Ok(ControlFlow::Continue(()));
                }
                debug!(key = %metadata.key, "Stream metadata");
                Ok(observer.on_metadata(&metadata))
            }
            chunk => {
                self.document.apply(chunk)?;
                self.chunks_applied += 1;
                observer.on_chunk(&self.document);
                Ok(ControlFlow::Continue(()))
            }
        }
    }
}
