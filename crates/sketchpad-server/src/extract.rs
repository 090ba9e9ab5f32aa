use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use sketchpad_core::services::SESSION_COOKIE;
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;
use crate::identity::{AuthUser, IdentityError};
use crate::repositories::StoreError;

/// The caller of a route: the signed-in user if any, and their network address.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: Option<AuthUser>,
    pub client_ip: String,
    pub token: Option<String>,
}

impl Actor {
    pub fn require_user(&self) -> Result<&AuthUser, ApiError> {
        self.user.as_ref().ok_or_else(ApiError::unauthorized)
    }
}

impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let client_ip = client_ip(&parts.headers);
        let token = session_token(&parts.headers);

        let user = match &token {
            None => None,
            Some(token) => match state.identity.identify(token).await {
                Ok(user) => user,
                Err(IdentityError::Store(StoreError::Unavailable)) => {
                    warn!("Session ignored: storage is not configured");
                    None
                }
                Err(err) => return Err(err.into()),
            },
        };

        Ok(Self {
            user,
            client_ip,
            token,
        })
    }
}

/// First `x-forwarded-for` entry, else `x-real-ip`, else `unknown`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for")
        && let Some(first) = forwarded.split(',').next()
    {
        return first.trim().to_string();
    }
    header("x-real-ip").unwrap_or("unknown").to_string()
}

/// The session cookie, falling back to an `Authorization: Bearer` token.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    })
}

/// Checks a request body must pass after it parsed.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// JSON body that parsed and validated; anything else answers 400 `{message}`.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        value.validate().map_err(ApiError::bad_request)?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_ip_precedence() {
        assert_eq!(
            client_ip(&headers(&[
                ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
                ("x-real-ip", "10.0.0.9")
            ])),
            "203.0.113.5"
        );
        assert_eq!(client_ip(&headers(&[("x-real-ip", "10.0.0.9")])), "10.0.0.9");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_session_token_sources() {
        assert_eq!(
            session_token(&headers(&[("cookie", "theme=dark; sketchpad_session=abc")])).as_deref(),
            Some("abc")
        );
        assert_eq!(
            session_token(&headers(&[("authorization", "Bearer xyz")])).as_deref(),
            Some("xyz")
        );
        assert!(session_token(&headers(&[("cookie", "sketchpad_session=")])).is_none());
    }
}
