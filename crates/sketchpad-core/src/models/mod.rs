pub mod attachment;
pub mod chat_detail;
pub mod conversation;
pub mod document;

pub use attachment::{Attachment, MAX_ATTACHMENTS, PreflightError, preflight};
pub use chat_detail::{
    ChatDetail, LatestVersion, MessageContent, Role, StoredMessage, Visibility,
};
pub use conversation::{
    Conversation, ExchangeState, Message, StreamHandle, SubmitRejected, TransitionError,
};
pub use document::{
    Chunk, CodeEditPart, Delta, Document, DocumentError, MathPart, Metadata, Part, TaskPart,
    TextPart, apply_chunk,
};
