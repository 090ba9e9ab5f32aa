//! Session/ownership gate: who is calling, if anyone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::repositories::{SessionRecord, Store, StoreError, UserRecord};

pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Guest,
    Regular,
}

impl UserType {
    /// Guest accounts are the ones with a `guest-` email.
    pub fn for_email(email: &str) -> Self {
        if email.starts_with("guest-") {
            UserType::Guest
        } else {
            UserType::Regular
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub user_type: UserType,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: AuthUser,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User already registered")]
    EmailTaken,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Store(err) => ApiError::Store(err),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Resolve a session token. Unknown and expired tokens are anonymous.
    async fn identify(&self, token: &str) -> Result<Option<AuthUser>, IdentityError>;

    async fn sign_out(&self, token: &str) -> Result<(), IdentityError>;
}

/// Users and sessions kept in the server's own store.
pub struct LocalIdentity {
    store: Arc<dyn Store>,
    session_ttl: Duration,
}

impl LocalIdentity {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            session_ttl: Duration::days(SESSION_TTL_DAYS),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    async fn open_session(&self, user: &UserRecord) -> Result<Session, IdentityError> {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.session_ttl;
        self.store
            .create_session(SessionRecord {
                token: token.clone(),
                user_id: user.id.clone(),
                expires_at: expires_at.timestamp(),
            })
            .await?;
        Ok(Session {
            token,
            user: auth_user(user),
            expires_at,
        })
    }
}

fn auth_user(user: &UserRecord) -> AuthUser {
    AuthUser {
        id: user.id.clone(),
        email: user.email.clone(),
        user_type: UserType::for_email(&user.email),
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let email = normalize_email(email);
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(IdentityError::EmailTaken);
        }

        let salt = Uuid::new_v4().simple().to_string();
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            email,
            password_digest: digest(&salt, password),
            salt,
            created_at: Utc::now().timestamp(),
        };
        match self.store.create_user(user.clone()).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => return Err(IdentityError::EmailTaken),
            Err(err) => return Err(err.into()),
        }
        info!(user_id = %user.id, "User registered");
        self.open_session(&user).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let email = normalize_email(email);
        let Some(user) = self.store.user_by_email(&email).await? else {
            return Err(IdentityError::InvalidCredentials);
        };
        if digest(&user.salt, password) != user.password_digest {
            debug!(user_id = %user.id, "Password mismatch");
            return Err(IdentityError::InvalidCredentials);
        }
        self.open_session(&user).await
    }

    async fn identify(&self, token: &str) -> Result<Option<AuthUser>, IdentityError> {
        let Some(session) = self.store.session(token).await? else {
            return Ok(None);
        };
        if session.expires_at <= Utc::now().timestamp() {
            debug!(user_id = %session.user_id, "Session expired");
            return Ok(None);
        }
        Ok(self
            .store
            .user_by_id(&session.user_id)
            .await?
            .as_ref()
            .map(auth_user))
    }

    async fn sign_out(&self, token: &str) -> Result<(), IdentityError> {
        self.store.delete_session(token).await?;
        Ok(())
    }
}
