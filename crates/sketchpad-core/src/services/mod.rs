pub mod chat_api;
pub mod handoff;
pub mod recording_stream;
pub mod sse_decoder;
pub mod stream_consumer;

pub use chat_api::{ChatApi, ChatReply, HttpChatApi, MessageRequest, SESSION_COOKIE};
pub use handoff::{Handoff, HandoffRelay};
pub use recording_stream::{RecordingStream, RecordingSwitch};
pub use sse_decoder::{DEFAULT_MAX_UNIT_BYTES, SseDecoder, SseError, SseUnit};
pub use stream_consumer::{ConsumeOutcome, Progress, StreamConsumer, StreamError, StreamObserver};
