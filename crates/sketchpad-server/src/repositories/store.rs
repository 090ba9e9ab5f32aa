use std::future::Future;
use std::pin::Pin;

use super::error::StoreResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Maps a provider chat id to the local user who created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub chat_id: String,
    pub user_id: String,
    pub created_at: i64, // Unix timestamp
}

/// A chat created without a session, keyed by client address for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousChatLog {
    pub ip_address: String,
    pub chat_id: String,
    pub created_at: i64, // Unix timestamp
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_digest: String, // hex SHA-256 of salt + password
    pub salt: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: String,
    pub expires_at: i64,
}

/// Everything the server persists. Each mutation is a single atomic statement.
pub trait Store: Send + Sync + 'static {
    /// Record ownership. A second insert for the same chat id is absorbed silently.
    fn create_ownership(
        &self,
        chat_id: &str,
        user_id: &str,
        created_at: i64,
    ) -> BoxFuture<'static, StoreResult<()>>;

    fn ownership(&self, chat_id: &str) -> BoxFuture<'static, StoreResult<Option<OwnershipRecord>>>;

    /// Chat ids owned by `user_id`, newest first.
    fn chat_ids_by_user(&self, user_id: &str) -> BoxFuture<'static, StoreResult<Vec<String>>>;

    fn delete_ownership(&self, chat_id: &str) -> BoxFuture<'static, StoreResult<()>>;

    fn count_ownerships_since(
        &self,
        user_id: &str,
        since: i64,
    ) -> BoxFuture<'static, StoreResult<u64>>;

    fn create_anonymous_log(&self, log: AnonymousChatLog) -> BoxFuture<'static, StoreResult<()>>;

    fn count_anonymous_since(
        &self,
        ip_address: &str,
        since: i64,
    ) -> BoxFuture<'static, StoreResult<u64>>;

    /// Fails with [`StoreError::Duplicate`](super::StoreError::Duplicate) when the email is taken.
    fn create_user(&self, user: UserRecord) -> BoxFuture<'static, StoreResult<()>>;

    fn user_by_email(&self, email: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>>;

    fn user_by_id(&self, id: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>>;

    fn create_session(&self, session: SessionRecord) -> BoxFuture<'static, StoreResult<()>>;

    fn session(&self, token: &str) -> BoxFuture<'static, StoreResult<Option<SessionRecord>>>;

    fn delete_session(&self, token: &str) -> BoxFuture<'static, StoreResult<()>>;
}
