use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};

use crate::ByteStream;
use crate::error::TransportError;

/// Wraps a byte stream and keeps every frame it yields, so a reader that stops
/// halfway can pass on a stream that starts again from the first byte.
///
/// Recording lasts only while its [`RecordingSwitch`] is on. Once switched off
/// the kept frames are released and later frames pass straight through.
pub struct RecordingStream<S> {
    inner: S,
    recorded: Vec<Bytes>,
    switch: RecordingSwitch,
}

/// Shared off switch for a [`RecordingStream`].
#[derive(Debug, Clone)]
pub struct RecordingSwitch(Arc<AtomicBool>);

impl RecordingSwitch {
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl<S> RecordingStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_switch(inner, true)
    }

    /// A wrapper that never records.
    pub fn passthrough(inner: S) -> Self {
        Self::with_switch(inner, false)
    }

    fn with_switch(inner: S, on: bool) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
            switch: RecordingSwitch(Arc::new(AtomicBool::new(on))),
        }
    }

    pub fn switch(&self) -> RecordingSwitch {
        self.switch.clone()
    }

    pub fn recorded_len(&self) -> usize {
        self.recorded.iter().map(Bytes::len).sum()
    }
}

impl<S> RecordingStream<S>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Send + Unpin + 'static,
{
    /// Replay what was read so far, then continue with the unread remainder.
    ///
    /// After the switch went off there is nothing to replay and only the
    /// remainder is returned.
    pub fn into_replay(self) -> ByteStream {
        let recorded = if self.switch.is_on() {
            self.recorded
        } else {
            Vec::new()
        };
        stream::iter(recorded.into_iter().map(Ok))
            .chain(self.inner)
            .boxed()
    }
}

impl<S> Stream for RecordingStream<S>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if this.switch.is_on() {
                    this.recorded.push(frame.clone());
                } else if !this.recorded.is_empty() {
                    this.recorded = Vec::new();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
