pub mod chat_controller;
pub mod composer_controller;
pub mod events;
mod exchange;
pub mod navigator;

pub use chat_controller::{ChatController, Mounted};
pub use composer_controller::{ComposerController, NavigationMode};
pub use events::{ConversationEvent, EventSink, ExchangeOutcome, event_channel};
pub use navigator::{NavigationEntry, Navigator, RecordingNavigator, chat_path};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use parking_lot::Mutex;
    use serde_json::Value;

    use crate::error::{ChatError, ErrorKind, TransportError};
    use crate::models::{ChatDetail, Visibility};
    use crate::services::{ChatApi, ChatReply, MessageRequest};

    pub const E2E_CHAT_ID: &str = "a1b2c3d4-e5f6-47a8-9abc-1234567890ab";

    pub const E2E_BODY: &str = concat!(
        "data: {\"type\":\"metadata\",\"payload\":{\"chatId\":\"a1b2c3d4-e5f6-47a8-9abc-1234567890ab\"}}\n\n",
        "data: {\"type\":\"append-part\",\"part\":{\"type\":\"text\",\"text\":\"Here is \"}}\n\n",
        "data: {\"type\":\"extend-last-part\",\"delta\":{\"text\":\"your landing page\"}}\n\n",
        "data: {\"type\":\"append-part\",\"part\":{\"type\":\"code-edit\",\"file\":\"app/page.tsx\",\"content\":\"export default\"}}\n\n",
    );

    pub fn stream_reply(body: &'static str, frame_size: usize) -> Result<ChatReply, ChatError> {
        let frames: Vec<Result<Bytes, TransportError>> = body
            .as_bytes()
            .chunks(frame_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(ChatReply::Stream(stream::iter(frames).boxed()))
    }

    /// Scripted backend: replies are queued, the canonical record is fixed.
    #[derive(Default)]
    pub struct FakeChatApi {
        replies: Mutex<VecDeque<Result<ChatReply, ChatError>>>,
        detail: Mutex<Option<ChatDetail>>,
        calls: Mutex<Vec<String>>,
        owned: Mutex<Vec<String>>,
    }

    impl FakeChatApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_reply(&self, reply: Result<ChatReply, ChatError>) {
            self.replies.lock().push_back(reply);
        }

        pub fn set_detail(&self, detail: ChatDetail) {
            *self.detail.lock() = Some(detail);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn owned(&self) -> Vec<String> {
            self.owned.lock().clone()
        }

        fn next_reply(&self) -> Result<ChatReply, ChatError> {
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ChatError::new(ErrorKind::Internal, "no reply queued")))
        }
    }

    #[async_trait]
    impl ChatApi for FakeChatApi {
        async fn create_chat(&self, _request: &MessageRequest) -> Result<ChatReply, ChatError> {
            self.calls.lock().push("create_chat".to_string());
            self.next_reply()
        }

        async fn send_message(
            &self,
            chat_id: &str,
            _request: &MessageRequest,
        ) -> Result<ChatReply, ChatError> {
            self.calls.lock().push(format!("send_message:{chat_id}"));
            self.next_reply()
        }

        async fn get_chat(&self, chat_id: &str) -> Result<ChatDetail, ChatError> {
            self.calls.lock().push(format!("get_chat:{chat_id}"));
            self.detail
                .lock()
                .clone()
                .ok_or_else(|| ChatError::new(ErrorKind::NotFound, "Chat not found"))
        }

        async fn record_ownership(&self, chat_id: &str) -> Result<(), ChatError> {
            self.owned.lock().push(chat_id.to_string());
            Ok(())
        }

        async fn list_chats(&self) -> Result<Vec<ChatDetail>, ChatError> {
            Ok(self.detail.lock().clone().into_iter().collect())
        }

        async fn delete_chat(&self, chat_id: &str) -> Result<Value, ChatError> {
            self.calls.lock().push(format!("delete_chat:{chat_id}"));
            Ok(Value::Null)
        }

        async fn fork_chat(&self, chat_id: &str) -> Result<ChatDetail, ChatError> {
            self.calls.lock().push(format!("fork_chat:{chat_id}"));
            self.get_chat(chat_id).await
        }

        async fn set_visibility(
            &self,
            chat_id: &str,
            _visibility: Visibility,
        ) -> Result<ChatDetail, ChatError> {
            self.get_chat(chat_id).await
        }
    }
}
