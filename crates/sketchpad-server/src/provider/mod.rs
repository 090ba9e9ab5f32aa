//! The hosted generation service behind the backend.

pub mod v0_client;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sketchpad_core::models::{Attachment, ChatDetail, Visibility};
use sketchpad_core::services::ChatReply;
use thiserror::Error;

pub use v0_client::{DEFAULT_V0_API_URL, V0Client};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Wait for the finished chat record.
    Sync,
    /// Relay the reply as an event stream while it is generated.
    ExperimentalStream,
}

/// Body of a create or send call to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub response_mode: ResponseMode,
}

impl GenerateRequest {
    pub fn is_streaming(&self) -> bool {
        self.response_mode == ResponseMode::ExperimentalStream
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider answered {status}")]
    Status { status: u16, message: Option<String> },

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    Malformed(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn create_chat(&self, request: &GenerateRequest) -> ProviderResult<ChatReply>;

    async fn send_message(
        &self,
        chat_id: &str,
        request: &GenerateRequest,
    ) -> ProviderResult<ChatReply>;

    async fn get_chat(&self, chat_id: &str) -> ProviderResult<ChatDetail>;

    async fn list_chats(&self) -> ProviderResult<Vec<ChatDetail>>;

    /// The provider's delete result, relayed as is.
    async fn delete_chat(&self, chat_id: &str) -> ProviderResult<Value>;

    async fn fork_chat(&self, chat_id: &str, privacy: Visibility) -> ProviderResult<ChatDetail>;

    async fn update_visibility(
        &self,
        chat_id: &str,
        privacy: Visibility,
    ) -> ProviderResult<ChatDetail>;
}
