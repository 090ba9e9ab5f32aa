use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sketchpad_core::TransportError;
use sketchpad_core::models::{ChatDetail, Visibility};
use sketchpad_core::services::ChatReply;
use sketchpad_server::entitlements::Entitlements;
use sketchpad_server::identity::{IdentityProvider, LocalIdentity};
use sketchpad_server::provider::{
    GenerateRequest, GenerationProvider, ProviderError, ProviderResult, ResponseMode,
};
use sketchpad_server::repositories::{AnonymousChatLog, InMemoryStore, Store};
use sketchpad_server::{AppState, build_router};
use tower::ServiceExt;

const CHAT_ID: &str = "a1b2c3d4-e5f6-47a8-9abc-1234567890ab";
const STREAM_BODY: &str = "data: {\"type\":\"metadata\",\"payload\":{\"chatId\":\"a1b2c3d4-e5f6-47a8-9abc-1234567890ab\"}}\n\ndata: {\"type\":\"text\",\"text\":\"Hi\"}\n\n";

#[derive(Default)]
struct FakeProvider {
    fail_status: Mutex<Option<u16>>,
    requests: Mutex<Vec<GenerateRequest>>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn record(&self, call: String) -> ProviderResult<()> {
        self.calls.lock().push(call);
        match *self.fail_status.lock() {
            Some(status) => Err(ProviderError::Status {
                status,
                message: Some("upstream exploded".into()),
            }),
            None => Ok(()),
        }
    }

    fn detail(id: &str) -> ChatDetail {
        serde_json::from_value(json!({
            "id": id,
            "latestVersion": {"demoUrl": "https://demo.example/xyz"},
            "messages": [{"id": "m1", "role": "user", "content": "Landing page"}]
        }))
        .unwrap()
    }

    fn reply(request: &GenerateRequest) -> ChatReply {
        match request.response_mode {
            ResponseMode::ExperimentalStream => {
                let frames: Vec<Result<Bytes, TransportError>> = STREAM_BODY
                    .as_bytes()
                    .chunks(7)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                ChatReply::Stream(stream::iter(frames).boxed())
            }
            ResponseMode::Sync => ChatReply::Document(Self::detail(CHAT_ID)),
        }
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn create_chat(&self, request: &GenerateRequest) -> ProviderResult<ChatReply> {
        self.record("create_chat".into())?;
        self.requests.lock().push(request.clone());
        Ok(Self::reply(request))
    }

    async fn send_message(
        &self,
        chat_id: &str,
        request: &GenerateRequest,
    ) -> ProviderResult<ChatReply> {
        self.record(format!("send_message:{chat_id}"))?;
        Ok(Self::reply(request))
    }

    async fn get_chat(&self, chat_id: &str) -> ProviderResult<ChatDetail> {
        self.record(format!("get_chat:{chat_id}"))?;
        Ok(Self::detail(chat_id))
    }

    async fn list_chats(&self) -> ProviderResult<Vec<ChatDetail>> {
        self.record("list_chats".into())?;
        Ok(vec![Self::detail("mine"), Self::detail("theirs")])
    }

    async fn delete_chat(&self, chat_id: &str) -> ProviderResult<Value> {
        self.record(format!("delete_chat:{chat_id}"))?;
        Ok(json!({"id": chat_id, "object": "chat", "deleted": true}))
    }

    async fn fork_chat(&self, chat_id: &str, privacy: Visibility) -> ProviderResult<ChatDetail> {
        self.record(format!("fork_chat:{chat_id}:{}", privacy.as_str()))?;
        Ok(Self::detail("forked-chat"))
    }

    async fn update_visibility(
        &self,
        chat_id: &str,
        privacy: Visibility,
    ) -> ProviderResult<ChatDetail> {
        self.record(format!("update_visibility:{chat_id}:{}", privacy.as_str()))?;
        Ok(Self::detail(chat_id))
    }
}

struct Harness {
    app: Router,
    store: Arc<InMemoryStore>,
    identity: Arc<LocalIdentity>,
    provider: Arc<FakeProvider>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let identity = Arc::new(LocalIdentity::new(store.clone()));
        let provider = Arc::new(FakeProvider::default());
        let state = Arc::new(AppState {
            provider: provider.clone(),
            store: store.clone(),
            identity: identity.clone(),
            limits: Entitlements::default(),
        });
        Self {
            app: build_router(state),
            store,
            identity,
            provider,
        }
    }

    async fn token(&self, email: &str) -> (String, String) {
        let session = self.identity.sign_up(email, "secret1").await.unwrap();
        (session.token, session.user.id)
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    fn calls(&self) -> Vec<String> {
        self.provider.calls.lock().clone()
    }
}

fn json_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
}

fn with_body(builder: axum::http::request::Builder, body: Value) -> Request<Body> {
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_ping() {
    let harness = Harness::new();
    let response = harness
        .send(Request::get("/ping").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"pong");
}

#[tokio::test]
async fn test_anonymous_fourth_create_is_rate_limited() {
    let harness = Harness::new();
    let now = Utc::now().timestamp();
    for i in 0..3 {
        harness
            .store
            .create_anonymous_log(AnonymousChatLog {
                ip_address: "203.0.113.5".into(),
                chat_id: format!("chat-{i}"),
                created_at: now - 60 * i,
            })
            .await
            .unwrap();
    }

    let body = json!({"message": "Landing page", "streaming": true});
    let request = with_body(
        json_request("POST", "/chats").header("x-forwarded-for", "203.0.113.5"),
        body,
    );
    let response = harness.send(request).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("exceeded your maximum"));
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn test_streamed_create_relays_bytes() {
    let harness = Harness::new();
    let body = json!({"message": "Landing page", "streaming": true});
    let response = harness
        .send(with_body(json_request("POST", "/chats"), body))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], STREAM_BODY.as_bytes());
    assert_eq!(
        harness.provider.requests.lock()[0].response_mode,
        ResponseMode::ExperimentalStream
    );

    // Attribution of streamed chats waits for the client.
    let logged = harness.store.count_anonymous_since("unknown", 0).await.unwrap();
    assert_eq!(logged, 0);
}

#[tokio::test]
async fn test_sync_create_logs_anonymous_chat() {
    let harness = Harness::new();
    let body = json!({"message": "Landing page"});
    let response = harness
        .send(with_body(
            json_request("POST", "/chats").header("x-real-ip", "198.51.100.7"),
            body,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["id"], CHAT_ID);
    assert_eq!(detail["latestVersion"]["demoUrl"], "https://demo.example/xyz");
    assert_eq!(
        harness.store.count_anonymous_since("198.51.100.7", 0).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_sync_create_records_ownership_for_user() {
    let harness = Harness::new();
    let (token, user_id) = harness.token("ada@example.com").await;
    let body = json!({"message": "Landing page", "streaming": false});
    let response = harness
        .send(with_body(
            json_request("POST", "/chats")
                .header("cookie", format!("sketchpad_session={token}")),
            body,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.store.chat_ids_by_user(&user_id).await.unwrap(),
        vec![CHAT_ID.to_string()]
    );
}

#[tokio::test]
async fn test_blank_message_is_bad_request() {
    let harness = Harness::new();
    let body = json!({"message": "   "});
    let response = harness
        .send(with_body(json_request("POST", "/chats"), body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["message"], "Message is required");

    let response = harness
        .send(
            Request::post("/chats")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["message"].is_string());
}

#[tokio::test]
async fn test_ownership_is_idempotent() {
    let harness = Harness::new();
    let (token, user_id) = harness.token("ada@example.com").await;

    for _ in 0..2 {
        let body = json!({"chatId": CHAT_ID});
        let response = harness
            .send(with_body(
                json_request("POST", "/chats/ownership")
                    .header("authorization", format!("Bearer {token}")),
                body,
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));
    }

    assert_eq!(harness.store.chat_ids_by_user(&user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_visibility_for_non_owner_is_not_found() {
    let harness = Harness::new();
    let (token, _) = harness.token("ada@example.com").await;
    harness
        .store
        .create_ownership(CHAT_ID, "someone-else", Utc::now().timestamp())
        .await
        .unwrap();

    let body = json!({"privacy": "public"});
    let response = harness
        .send(with_body(
            json_request("PATCH", &format!("/chats/{CHAT_ID}/visibility"))
                .header("authorization", format!("Bearer {token}")),
            body,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn test_visibility_needs_session_and_valid_privacy() {
    let harness = Harness::new();
    let body = json!({"privacy": "public"});
    let response = harness
        .send(with_body(
            json_request("PATCH", "/chats/chat-1/visibility"),
            body,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (token, user_id) = harness.token("ada@example.com").await;
    harness.store.create_ownership("chat-1", &user_id, 1).await.unwrap();
    let body = json!({"privacy": "everyone"});
    let response = harness
        .send(with_body(
            json_request("PATCH", "/chats/chat-1/visibility")
                .header("authorization", format!("Bearer {token}")),
            body,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json!({"privacy": "team-edit"});
    let response = harness
        .send(with_body(
            json_request("PATCH", "/chats/chat-1/visibility")
                .header("authorization", format!("Bearer {token}")),
            body,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.calls(), vec!["update_visibility:chat-1:team-edit".to_string()]);
}

#[tokio::test]
async fn test_list_is_empty_for_anonymous_and_filtered_for_user() {
    let harness = Harness::new();
    let response = harness
        .send(Request::get("/chats").body(Body::empty()).unwrap())
        .await;
    assert_eq!(body_json(response).await, json!({"data": []}));
    assert!(harness.calls().is_empty());

    let (token, user_id) = harness.token("ada@example.com").await;
    harness.store.create_ownership("mine", &user_id, 1).await.unwrap();
    let response = harness
        .send(
            Request::get("/chats")
                .header("cookie", format!("sketchpad_session={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let body = body_json(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["mine"]);
}

#[tokio::test]
async fn test_get_chat_checks_ownership_only_with_session() {
    let harness = Harness::new();
    harness.store.create_ownership("theirs", "someone-else", 1).await.unwrap();

    let response = harness
        .send(Request::get("/chats/theirs").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (token, _) = harness.token("ada@example.com").await;
    for chat in ["theirs", "unknown-chat"] {
        let response = harness
            .send(
                Request::get(format!("/chats/{chat}"))
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_delete_removes_ownership() {
    let harness = Harness::new();
    let (token, user_id) = harness.token("ada@example.com").await;
    harness.store.create_ownership("chat-1", &user_id, 1).await.unwrap();

    let response = harness
        .send(
            Request::delete("/chats/chat-1")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["deleted"], true);
    assert!(harness.store.ownership("chat-1").await.unwrap().is_none());

    let response = harness
        .send(Request::delete("/chats/chat-1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_fork_is_private_and_owned() {
    let harness = Harness::new();
    let (token, user_id) = harness.token("ada@example.com").await;

    let response = harness
        .send(
            Request::post("/chats/chat-1/fork")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.calls(), vec!["fork_chat:chat-1:private".to_string()]);
    assert_eq!(
        harness.store.chat_ids_by_user(&user_id).await.unwrap(),
        vec!["forked-chat".to_string()]
    );
}

#[tokio::test]
async fn test_send_message_is_rate_limited_for_user() {
    let harness = Harness::new();
    let (token, user_id) = harness.token("guest-42@example.com").await;
    let now = Utc::now().timestamp();
    for i in 0..5 {
        harness
            .store
            .create_ownership(&format!("chat-{i}"), &user_id, now)
            .await
            .unwrap();
    }

    let body = json!({"message": "Make it blue"});
    let response = harness
        .send(with_body(
            json_request("POST", "/chats/chat-0/message")
                .header("authorization", format!("Bearer {token}")),
            body,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let harness = Harness::new();
    *harness.provider.fail_status.lock() = Some(500);

    let body = json!({"message": "Landing page"});
    let response = harness
        .send(with_body(json_request("POST", "/chats"), body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let message = body_json(response).await["message"].as_str().unwrap().to_string();
    assert!(!message.contains("exploded"));
}

#[tokio::test]
async fn test_sign_up_sets_session_cookie() {
    let harness = Harness::new();
    let body = json!({"email": "ada@example.com", "password": "secret1"});
    let response = harness
        .send(with_body(json_request("POST", "/auth/signup"), body))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("sketchpad_session="));
    assert!(cookie.contains("HttpOnly"));
    assert_eq!(body_json(response).await["type"], "success");

    let body = json!({"email": "ada@example.com", "password": "wrong-password"});
    let response = harness
        .send(with_body(json_request("POST", "/auth/signin"), body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json!({"email": "bob@example.com", "password": "123"});
    let response = harness
        .send(with_body(json_request("POST", "/auth/signup"), body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sign_out_revokes_session() {
    let harness = Harness::new();
    let (token, _) = harness.token("ada@example.com").await;

    let response = harness
        .send(
            Request::post("/auth/signout")
                .header("cookie", format!("sketchpad_session={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.identity.identify(&token).await.unwrap().is_none());
}
