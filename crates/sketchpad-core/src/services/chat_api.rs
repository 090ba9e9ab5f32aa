use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ByteStream;
use crate::error::{ChatError, ErrorKind, TransportError};
use crate::models::{Attachment, ChatDetail, Visibility};

/// Name of the cookie that carries the session token.
pub const SESSION_COOKIE: &str = "sketchpad_session";

/// Body of a create or send request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl MessageRequest {
    pub fn streaming(message: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            message: message.into(),
            streaming: Some(true),
            attachments,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.unwrap_or(false)
    }
}

/// What the backend answered with: a finished record or a live byte stream.
pub enum ChatReply {
    Document(ChatDetail),
    Stream(ByteStream),
}

impl std::fmt::Debug for ChatReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatReply::Document(detail) => f.debug_tuple("Document").field(detail).finish(),
            ChatReply::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Client seam to the backend-for-frontend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_chat(&self, request: &MessageRequest) -> Result<ChatReply, ChatError>;

    async fn send_message(
        &self,
        chat_id: &str,
        request: &MessageRequest,
    ) -> Result<ChatReply, ChatError>;

    async fn get_chat(&self, chat_id: &str) -> Result<ChatDetail, ChatError>;

    /// Claim a chat created through a stream for the current caller.
    async fn record_ownership(&self, chat_id: &str) -> Result<(), ChatError>;

    async fn list_chats(&self) -> Result<Vec<ChatDetail>, ChatError>;

    async fn delete_chat(&self, chat_id: &str) -> Result<Value, ChatError>;

    async fn fork_chat(&self, chat_id: &str) -> Result<ChatDetail, ChatError>;

    async fn set_visibility(
        &self,
        chat_id: &str,
        visibility: Visibility,
    ) -> Result<ChatDetail, ChatError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct ListBody {
    #[serde(default)]
    data: Vec<ChatDetail>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// [`ChatApi`] over HTTP, carrying the session as a cookie.
#[derive(Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    session: Arc<RwLock<Option<String>>>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sketchpad/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::new(ErrorKind::Internal, e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(None)),
        })
    }

    pub fn with_session(self, token: Option<String>) -> Self {
        *self.session.write() = token;
        self
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.read().clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ChatError> {
        self.authenticate("/auth/signin", email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<(), ChatError> {
        self.authenticate("/auth/signup", email, password).await
    }

    pub async fn sign_out(&self) -> Result<(), ChatError> {
        let response = self.send(self.request(Method::POST, "/auth/signout")).await?;
        check_status(response).await?;
        *self.session.write() = None;
        Ok(())
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<(), ChatError> {
        let request = self
            .request(Method::POST, path)
            .json(&Credentials { email, password });
        let response = check_status(self.send(request).await?).await?;

        let token = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(session_from_set_cookie);
        match token {
            Some(token) => {
                *self.session.write() = Some(token);
                Ok(())
            }
            None => {
                warn!(path, "Authentication succeeded without a session cookie");
                Ok(())
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match self.session.read().as_deref() {
            Some(token) => builder.header(COOKIE, format!("{SESSION_COOKIE}={token}")),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ChatError> {
        request.send().await.map_err(ChatError::offline)
    }

    async fn post_message(&self, path: &str, request: &MessageRequest) -> Result<ChatReply, ChatError> {
        let response = self
            .send(self.request(Method::POST, path).json(request))
            .await?;
        into_reply(check_status(response).await?).await
    }
}

fn session_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
}

async fn check_status(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message);
    debug!(status = status.as_u16(), message = ?message, "Request rejected");
    Err(ChatError::from_status(status.as_u16(), message))
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

async fn into_reply(response: Response) -> Result<ChatReply, ChatError> {
    if is_event_stream(&response) {
        let stream = response
            .bytes_stream()
            .map(|frame| frame.map_err(TransportError::from))
            .boxed();
        return Ok(ChatReply::Stream(stream));
    }
    read_json(response).await.map(ChatReply::Document)
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ChatError::malformed(format!("unexpected response body: {e}")))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn create_chat(&self, request: &MessageRequest) -> Result<ChatReply, ChatError> {
        self.post_message("/chats", request).await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        request: &MessageRequest,
    ) -> Result<ChatReply, ChatError> {
        self.post_message(&format!("/chats/{chat_id}/message"), request)
            .await
    }

    async fn get_chat(&self, chat_id: &str) -> Result<ChatDetail, ChatError> {
        let response = self
            .send(self.request(Method::GET, &format!("/chats/{chat_id}")))
            .await?;
        read_json(check_status(response).await?).await
    }

    async fn record_ownership(&self, chat_id: &str) -> Result<(), ChatError> {
        let request = self
            .request(Method::POST, "/chats/ownership")
            .json(&serde_json::json!({ "chatId": chat_id }));
        check_status(self.send(request).await?).await?;
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatDetail>, ChatError> {
        let response = self.send(self.request(Method::GET, "/chats")).await?;
        let body: ListBody = read_json(check_status(response).await?).await?;
        Ok(body.data)
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<Value, ChatError> {
        let response = self
            .send(self.request(Method::DELETE, &format!("/chats/{chat_id}")))
            .await?;
        read_json(check_status(response).await?).await
    }

    async fn fork_chat(&self, chat_id: &str) -> Result<ChatDetail, ChatError> {
        let response = self
            .send(self.request(Method::POST, &format!("/chats/{chat_id}/fork")))
            .await?;
        read_json(check_status(response).await?).await
    }

    async fn set_visibility(
        &self,
        chat_id: &str,
        visibility: Visibility,
    ) -> Result<ChatDetail, ChatError> {
        let request = self
            .request(Method::PATCH, &format!("/chats/{chat_id}/visibility"))
            .json(&serde_json::json!({ "privacy": visibility }));
        read_json(check_status(self.send(request).await?).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RATE_LIMIT_MESSAGE;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_json_reply_is_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chats"))
            .and(body_json(serde_json::json!({"message": "hi", "streaming": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chat-1", "demo": "https://demo.example/1", "messages": []
            })))
            .mount(&server)
            .await;

        let api = HttpChatApi::new(server.uri()).unwrap();
        let request = MessageRequest {
            message: "hi".into(),
            streaming: Some(false),
            attachments: vec![],
        };
        match api.create_chat(&request).await.unwrap() {
            ChatReply::Document(detail) => assert_eq!(detail.id, "chat-1"),
            other => panic!("expected document, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_stream_reply_is_stream() {
        let server = MockServer::start().await;
        let body = "data: {\"type\":\"text\",\"text\":\"hi\"}\n\n";
        Mock::given(method("POST"))
            .and(path("/chats/c1/message"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let api = HttpChatApi::new(server.uri()).unwrap();
        let reply = api
            .send_message("c1", &MessageRequest::streaming("hi", vec![]))
            .await
            .unwrap();
        let ChatReply::Stream(stream) = reply else {
            panic!("expected stream");
        };
        let bytes: Vec<u8> = stream
            .map(|frame| frame.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(bytes, body.as_bytes());
    }

    #[tokio::test]
    async fn test_rate_limit_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chats"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let api = HttpChatApi::new(server.uri()).unwrap();
        let err = api
            .create_chat(&MessageRequest::streaming("hi", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.user_message(), RATE_LIMIT_MESSAGE);
    }

    #[tokio::test]
    async fn test_error_body_message_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats/c9"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Chat not found"})),
            )
            .mount(&server)
            .await;

        let api = HttpChatApi::new(server.uri()).unwrap();
        let err = api.get_chat("c9").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "Chat not found");
    }

    #[tokio::test]
    async fn test_sign_in_stores_session_and_sends_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/signin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "sketchpad_session=tok-123; Path=/; HttpOnly")
                    .set_body_json(serde_json::json!({"type": "success"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .and(header("cookie", "sketchpad_session=tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "mine"}]
            })))
            .mount(&server)
            .await;

        let api = HttpChatApi::new(server.uri()).unwrap();
        api.sign_in("a@b.co", "secret").await.unwrap();
        assert_eq!(api.session_token().as_deref(), Some("tok-123"));

        let chats = api.list_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, "mine");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_offline() {
        let api = HttpChatApi::new("http://127.0.0.1:9").unwrap();
        let err = api.get_chat("c1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Offline);
    }

    #[test]
    fn test_session_cookie_parsing() {
        assert_eq!(
            session_from_set_cookie("sketchpad_session=abc; HttpOnly").as_deref(),
            Some("abc")
        );
        assert_eq!(session_from_set_cookie("other=abc"), None);
        assert_eq!(session_from_set_cookie("sketchpad_session=; Max-Age=0"), None);
    }
}
