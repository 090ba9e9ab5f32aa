//! Backend-for-frontend for sketchpad: relays chats to the generation
//! provider, records who owns which chat and enforces daily limits.

pub mod config;
pub mod entitlements;
pub mod error;
pub mod extract;
pub mod identity;
pub mod provider;
pub mod repositories;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use entitlements::Entitlements;
use identity::IdentityProvider;
use provider::GenerationProvider;
use repositories::Store;
use routes::{auth, chats};

/// Shared by every request handler.
pub struct AppState {
    pub provider: Arc<dyn GenerationProvider>,
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub limits: Entitlements,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/auth/signin", post(auth::sign_in))
        .route("/auth/signup", post(auth::sign_up))
        .route("/auth/signout", post(auth::sign_out))
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/chats/ownership", post(chats::record_ownership))
        .route("/chats/{id}", get(chats::get_chat).delete(chats::delete_chat))
        .route("/chats/{id}/message", post(chats::send_message))
        .route("/chats/{id}/fork", post(chats::fork_chat))
        .route("/chats/{id}/visibility", patch(chats::update_visibility))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}
