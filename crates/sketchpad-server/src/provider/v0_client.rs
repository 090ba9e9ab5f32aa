use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sketchpad_core::TransportError;
use sketchpad_core::models::{ChatDetail, Visibility};
use sketchpad_core::services::ChatReply;
use tracing::{debug, warn};

use super::{GenerateRequest, GenerationProvider, ProviderError, ProviderResult};

pub const DEFAULT_V0_API_URL: &str = "https://api.v0.dev/v1";

#[derive(Deserialize)]
struct ChatList {
    #[serde(default)]
    data: Vec<ChatDetail>,
}

/// Client for the hosted v0 platform API.
#[derive(Clone)]
pub struct V0Client {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl V0Client {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sketchpad-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_V0_API_URL.to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "v0 API unreachable");
            ProviderError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        let message = error_message(&body);
        debug!(status = status.as_u16(), message = ?message, "v0 API rejected request");
        Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_generation(&self, path: &str, request: &GenerateRequest) -> ProviderResult<ChatReply> {
        let response = self
            .send(self.request(Method::POST, path).json(request))
            .await?;

        if is_event_stream(&response) {
            let stream = response
                .bytes_stream()
                .map(|frame| frame.map_err(TransportError::from))
                .boxed();
            return Ok(ChatReply::Stream(stream));
        }
        if request.is_streaming() {
            debug!(path, "Stream requested but provider answered with a record");
        }
        read_json(response).await.map(ChatReply::Document)
    }
}

/// `{"message": ...}` or `{"error": {"message": ...}}`
fn error_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[async_trait]
impl GenerationProvider for V0Client {
    async fn create_chat(&self, request: &GenerateRequest) -> ProviderResult<ChatReply> {
        self.post_generation("/chats", request).await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        request: &GenerateRequest,
    ) -> ProviderResult<ChatReply> {
        self.post_generation(&format!("/chats/{chat_id}/messages"), request)
            .await
    }

    async fn get_chat(&self, chat_id: &str) -> ProviderResult<ChatDetail> {
        let response = self
            .send(self.request(Method::GET, &format!("/chats/{chat_id}")))
            .await?;
        read_json(response).await
    }

    async fn list_chats(&self) -> ProviderResult<Vec<ChatDetail>> {
        let response = self.send(self.request(Method::GET, "/chats")).await?;
        let list: ChatList = read_json(response).await?;
        Ok(list.data)
    }

    async fn delete_chat(&self, chat_id: &str) -> ProviderResult<Value> {
        let response = self
            .send(self.request(Method::DELETE, &format!("/chats/{chat_id}")))
            .await?;
        read_json(response).await
    }

    async fn fork_chat(&self, chat_id: &str, privacy: Visibility) -> ProviderResult<ChatDetail> {
        let request = self
            .request(Method::POST, &format!("/chats/{chat_id}/fork"))
            .json(&json!({ "privacy": privacy }));
        read_json(self.send(request).await?).await
    }

    async fn update_visibility(
        &self,
        chat_id: &str,
        privacy: Visibility,
    ) -> ProviderResult<ChatDetail> {
        let request = self
            .request(Method::PATCH, &format!("/chats/{chat_id}"))
            .json(&json!({ "privacy": privacy }));
        read_json(self.send(request).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ResponseMode;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(mode: ResponseMode) -> GenerateRequest {
        GenerateRequest {
            message: "Landing page".into(),
            attachments: Vec::new(),
            response_mode: mode,
        }
    }

    #[tokio::test]
    async fn test_sync_create_sends_bearer_and_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chats"))
            .and(header("authorization", "Bearer v0_sk_test"))
            .and(body_json(json!({"message": "Landing page", "responseMode": "sync"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chat-1", "demo": "https://demo.example/1", "messages": []
            })))
            .mount(&server)
            .await;

        let client = V0Client::new("v0_sk_test", Some(server.uri())).unwrap();
        let reply = client.create_chat(&request(ResponseMode::Sync)).await.unwrap();
        match reply {
            ChatReply::Document(detail) => assert_eq!(detail.id, "chat-1"),
            ChatReply::Stream(_) => panic!("expected a record"),
        }
    }

    #[tokio::test]
    async fn test_event_stream_is_relayed_as_bytes() {
        let server = MockServer::start().await;
        let body = "data: {\"type\":\"text\",\"text\":\"hi\"}\n\n";
        Mock::given(method("POST"))
            .and(path("/chats/chat-1/messages"))
            .and(body_json(json!({"message": "Landing page", "responseMode": "experimental_stream"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = V0Client::new("key", Some(server.uri())).unwrap();
        let reply = client
            .send_message("chat-1", &request(ResponseMode::ExperimentalStream))
            .await
            .unwrap();
        let ChatReply::Stream(mut stream) = reply else {
            panic!("expected a stream");
        };
        let mut received = Vec::new();
        while let Some(frame) = stream.next().await {
            received.extend_from_slice(&frame.unwrap());
        }
        assert_eq!(received, body.as_bytes());
    }

    #[tokio::test]
    async fn test_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats/missing"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": {"message": "Chat not found", "type": "not_found"}})),
            )
            .mount(&server)
            .await;

        let client = V0Client::new("key", Some(server.uri())).unwrap();
        let err = client.get_chat("missing").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Status { status: 404, message: Some(ref m) } if m == "Chat not found"
        ));
    }

    #[tokio::test]
    async fn test_list_unwraps_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list", "data": [{"id": "a"}, {"id": "b"}]
            })))
            .mount(&server)
            .await;

        let client = V0Client::new("key", Some(format!("{}/", server.uri()))).unwrap();
        let chats = client.list_chats().await.unwrap();
        assert_eq!(chats.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_visibility_patches_chat() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/chats/chat-1"))
            .and(body_json(json!({"privacy": "team-edit"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chat-1", "privacy": "team-edit"
            })))
            .mount(&server)
            .await;

        let client = V0Client::new("key", Some(server.uri())).unwrap();
        let detail = client
            .update_visibility("chat-1", Visibility::TeamEdit)
            .await
            .unwrap();
        assert_eq!(detail.privacy.as_deref(), Some("team-edit"));
    }

    #[test]
    fn test_default_base_url() {
        let client = V0Client::new("key", None).unwrap();
        assert_eq!(client.base_url(), DEFAULT_V0_API_URL);
    }
}
