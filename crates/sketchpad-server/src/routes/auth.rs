use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sketchpad_core::services::SESSION_COOKIE;
use tracing::info;

use crate::AppState;
use crate::error::ApiResult;
use crate::extract::{Actor, Validate, ValidJson};
use crate::identity::{IdentityError, Session};
use crate::repositories::StoreError;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct SignInBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpBody {
    pub email: String,
    pub password: String,
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

impl Validate for SignInBody {
    fn validate(&self) -> Result<(), String> {
        if !looks_like_email(&self.email) {
            return Err("Please enter a valid email.".into());
        }
        if self.password.is_empty() {
            return Err("Password is required.".into());
        }
        Ok(())
    }
}

impl Validate for SignUpBody {
    fn validate(&self) -> Result<(), String> {
        if !looks_like_email(&self.email) {
            return Err("Please enter a valid email.".into());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters."
            ));
        }
        Ok(())
    }
}

fn session_cookie(session: &Session) -> String {
    let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);
    format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}", session.token)
}

fn cleared_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn success(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "type": "success", "message": message }))
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<SignInBody>,
) -> ApiResult<impl IntoResponse> {
    let session = state.identity.sign_in(&body.email, &body.password).await?;
    info!(user_id = %session.user.id, "Signed in");
    Ok(([(SET_COOKIE, session_cookie(&session))], success("Signed in successfully")))
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<SignUpBody>,
) -> ApiResult<impl IntoResponse> {
    let session = state.identity.sign_up(&body.email, &body.password).await?;
    Ok(([(SET_COOKIE, session_cookie(&session))], success("Signed up successfully")))
}

pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    if let Some(token) = &actor.token {
        match state.identity.sign_out(token).await {
            Ok(()) | Err(IdentityError::Store(StoreError::Unavailable)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(([(SET_COOKIE, cleared_cookie())], success("Signed out successfully")))
}
