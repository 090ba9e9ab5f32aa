use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sketchpad_core::ByteStream;
use sketchpad_core::models::{ChatDetail, Visibility};
use sketchpad_core::services::{ChatReply, MessageRequest};
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Actor, Validate, ValidJson};
use crate::provider::{GenerateRequest, ResponseMode};
use crate::repositories::{AnonymousChatLog, StoreError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipBody {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityBody {
    pub privacy: Visibility,
}

impl Validate for MessageRequest {
    fn validate(&self) -> Result<(), String> {
        if self.message.trim().is_empty() {
            return Err("Message is required".into());
        }
        if self.attachments.iter().any(|a| a.url.trim().is_empty()) {
            return Err("Attachment URL is required".into());
        }
        Ok(())
    }
}

impl Validate for OwnershipBody {
    fn validate(&self) -> Result<(), String> {
        if self.chat_id.trim().is_empty() {
            return Err("Chat ID is required".into());
        }
        Ok(())
    }
}

impl Validate for VisibilityBody {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

fn generate_request(body: MessageRequest) -> GenerateRequest {
    let response_mode = if body.is_streaming() {
        ResponseMode::ExperimentalStream
    } else {
        ResponseMode::Sync
    };
    GenerateRequest {
        message: body.message,
        attachments: body.attachments,
        response_mode,
    }
}

/// Relay the provider's bytes as they arrive.
fn event_stream(stream: ByteStream) -> Response {
    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(stream),
    )
        .into_response()
}

fn reply_response(reply: ChatReply) -> Response {
    match reply {
        ChatReply::Stream(stream) => event_stream(stream),
        ChatReply::Document(detail) => Json(detail).into_response(),
    }
}

/// Attribute a new chat to the caller: ownership when signed in, the
/// anonymous log otherwise. Skipped without a database.
async fn record_creation(state: &AppState, actor: &Actor, chat_id: &str) -> ApiResult<()> {
    let now = Utc::now().timestamp();
    let result = match &actor.user {
        Some(user) => state.store.create_ownership(chat_id, &user.id, now).await,
        None => {
            state
                .store
                .create_anonymous_log(AnonymousChatLog {
                    ip_address: actor.client_ip.clone(),
                    chat_id: chat_id.to_string(),
                    created_at: now,
                })
                .await
        }
    };
    match result {
        Ok(()) => Ok(()),
        Err(StoreError::Unavailable) => {
            debug!(conv_id = %chat_id, "Chat attribution skipped: storage is not configured");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// 404 unless the signed-in caller owns `chat_id`. Foreign and unknown chats look the same.
async fn require_owner(state: &AppState, user_id: &str, chat_id: &str, message: &str) -> ApiResult<()> {
    match state.store.ownership(chat_id).await? {
        Some(ownership) if ownership.user_id == user_id => Ok(()),
        Some(_) => {
            warn!(conv_id = %chat_id, user_id, "Access to a chat owned by someone else");
            Err(ApiError::not_found(message))
        }
        None => Err(ApiError::not_found(message)),
    }
}

pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(user) = &actor.user else {
        return Ok(Json(json!({ "data": [] })));
    };

    let owned: HashSet<String> = state.store.chat_ids_by_user(&user.id).await?.into_iter().collect();
    if owned.is_empty() {
        return Ok(Json(json!({ "data": [] })));
    }

    let chats: Vec<ChatDetail> = state
        .provider
        .list_chats()
        .await?
        .into_iter()
        .filter(|chat| owned.contains(&chat.id))
        .collect();
    Ok(Json(json!({ "data": chats })))
}

pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ValidJson(body): ValidJson<MessageRequest>,
) -> ApiResult<Response> {
    state
        .limits
        .check(state.store.as_ref(), actor.user.as_ref(), &actor.client_ip, Utc::now())
        .await?;

    let request = generate_request(body);
    let reply = state.provider.create_chat(&request).await?;

    // Streamed creates are attributed later through POST /chats/ownership.
    let created = match &reply {
        ChatReply::Document(detail) if !detail.id.is_empty() => Some(detail.id.clone()),
        _ => None,
    };
    if let Some(chat_id) = created {
        record_creation(&state, &actor, &chat_id).await?;
        info!(conv_id = %chat_id, signed_in = actor.user.is_some(), "Chat created");
    }
    Ok(reply_response(reply))
}

pub async fn record_ownership(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ValidJson(body): ValidJson<OwnershipBody>,
) -> ApiResult<Json<serde_json::Value>> {
    record_creation(&state, &actor, body.chat_id.trim()).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatDetail>> {
    if let Some(user) = &actor.user {
        require_owner(&state, &user.id, &chat_id, "Chat not found").await?;
    }
    let detail = state.provider.get_chat(&chat_id).await?;
    Ok(Json(detail))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(chat_id): Path<String>,
    ValidJson(body): ValidJson<MessageRequest>,
) -> ApiResult<Response> {
    state
        .limits
        .check(state.store.as_ref(), actor.user.as_ref(), &actor.client_ip, Utc::now())
        .await?;

    let request = generate_request(body);
    let reply = state.provider.send_message(&chat_id, &request).await?;
    debug!(conv_id = %chat_id, streaming = request.is_streaming(), "Message sent");
    Ok(reply_response(reply))
}

pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = actor.require_user()?;
    require_owner(&state, &user.id, &chat_id, "Chat not found or access denied").await?;

    let result = state.provider.delete_chat(&chat_id).await?;
    state.store.delete_ownership(&chat_id).await?;
    info!(conv_id = %chat_id, user_id = %user.id, "Chat deleted");
    Ok(Json(result))
}

pub async fn fork_chat(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatDetail>> {
    let forked = state.provider.fork_chat(&chat_id, Visibility::Private).await?;
    if actor.user.is_some() && !forked.id.is_empty() {
        record_creation(&state, &actor, &forked.id).await?;
    }
    info!(conv_id = %chat_id, fork_id = %forked.id, "Chat forked");
    Ok(Json(forked))
}

pub async fn update_visibility(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(chat_id): Path<String>,
    ValidJson(body): ValidJson<VisibilityBody>,
) -> ApiResult<Json<ChatDetail>> {
    let user = actor.require_user()?;
    require_owner(&state, &user.id, &chat_id, "Chat not found or access denied").await?;

    let updated = state
        .provider
        .update_visibility(&chat_id, body.privacy)
        .await?;
    Ok(Json(updated))
}
